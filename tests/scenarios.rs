//! End-to-end request/response scenarios over a scripted transport.

use std::collections::VecDeque;

use voltage_modbus_session::checksum::compute_crc16;
use voltage_modbus_session::{
    byte_structure, Envelope, ForwardSession, ForwardSettings, ModbusError, ModbusProtocol,
    ModbusResult, RtuSession, SessionState, TcpSession,
};

byte_structure! {
    #[derive(Debug, Clone, Copy, PartialEq)]
    struct ReadRegisters {
        #[endian(big)]
        start_address: u16,
        #[endian(big)]
        quantity: u16,
    }
}

byte_structure! {
    #[derive(Debug, Clone, Copy, PartialEq)]
    struct HoldingRegisters {
        byte_count: u8,
        #[endian(big)]
        registers: [u16; 3],
    }
}

/// Replays canned answers and records what was sent.
#[derive(Default)]
struct ScriptedProtocol {
    sent: Vec<Vec<u8>>,
    answers: VecDeque<Option<Vec<u8>>>,
}

impl ScriptedProtocol {
    fn answering(answers: impl IntoIterator<Item = Option<Vec<u8>>>) -> Self {
        Self {
            sent: Vec::new(),
            answers: answers.into_iter().collect(),
        }
    }
}

impl ModbusProtocol for ScriptedProtocol {
    fn send_for_result(
        &mut self,
        request: &[u8],
        response_len: usize,
    ) -> ModbusResult<Option<Vec<u8>>> {
        self.sent.push(request.to_vec());
        let answer = self.answers.pop_front().flatten();
        if let Some(answer) = &answer {
            assert_eq!(answer.len(), response_len, "scripted answer has wrong length");
        }
        Ok(answer)
    }
}

fn with_crc(body: &[u8]) -> Vec<u8> {
    let mut frame = body.to_vec();
    frame.extend_from_slice(&compute_crc16(body, 0, body.len()));
    frame
}

const READ_THREE: ReadRegisters = ReadRegisters {
    start_address: 0x006B,
    quantity: 0x0003,
};

#[test]
fn rtu_read_holding_registers() {
    let answer = with_crc(&[0x11, 0x03, 0x06, 0x02, 0x2B, 0x00, 0x00, 0x00, 0x64]);
    let mut session = RtuSession::new(ScriptedProtocol::answering([Some(answer.clone())]));

    let response = session
        .send_request::<HoldingRegisters, _>(0x11, 0x03, &READ_THREE)
        .unwrap()
        .expect("slave answered");

    let body = [0x11, 0x03, 0x00, 0x6B, 0x00, 0x03];
    let sent = &session.protocol().sent[0];
    assert_eq!(&sent[..6], &body);
    assert_eq!(&sent[6..], &compute_crc16(&body, 0, body.len()));

    assert_eq!(response.slave_address(), 0x11);
    assert_eq!(response.function_code(), 0x03);
    assert_eq!(
        response.data(),
        &HoldingRegisters {
            byte_count: 6,
            registers: [0x022B, 0x0000, 0x0064],
        }
    );
    assert_eq!(
        response.envelope(),
        &Envelope::Rtu {
            crc: [answer[9], answer[10]]
        }
    );
}

#[test]
fn rtu_broadcast_write_has_no_response() {
    let mut session = RtuSession::new(ScriptedProtocol::answering([None]));

    let response = session
        .send_request::<[u8; 4], _>(0x00, 0x06, &[0x00u8, 0x01, 0x00, 0x03])
        .unwrap();
    assert!(response.is_none());
}

#[test]
fn tcp_first_transaction_is_zero() {
    let answer = vec![
        0x00, 0x00, 0x00, 0x00, 0x00, 0x09, 0x11, 0x03, 0x06, 0x02, 0x2B, 0x00, 0x00, 0x00, 0x64,
    ];
    let mut session = TcpSession::new(ScriptedProtocol::answering([Some(answer)]));

    let response = session
        .send_request::<HoldingRegisters, _>(0x11, 0x03, &READ_THREE)
        .unwrap()
        .expect("slave answered");

    assert_eq!(
        session.protocol().sent[0],
        vec![0x00, 0x00, 0x00, 0x00, 0x00, 0x06, 0x11, 0x03, 0x00, 0x6B, 0x00, 0x03]
    );
    let header = response.mbap().expect("tcp header");
    assert_eq!(header.transaction_id, 0);
    assert_eq!(header.protocol_id, 0);
    assert_eq!(header.length, 9);
    assert_eq!(response.data().registers, [0x022B, 0x0000, 0x0064]);
}

#[test]
fn tcp_response_for_other_transaction_is_rejected() {
    let answer = vec![
        0x00, 0x01, 0x00, 0x00, 0x00, 0x09, 0x11, 0x03, 0x06, 0x02, 0x2B, 0x00, 0x00, 0x00, 0x64,
    ];
    let mut session = TcpSession::new(ScriptedProtocol::answering([Some(answer)]));

    let result = session.send_request::<HoldingRegisters, _>(0x11, 0x03, &READ_THREE);
    let error = result.unwrap_err();
    assert!(matches!(error, ModbusError::DataCorrupted { .. }));
    assert!(error.is_protocol_violation());
}

#[test]
fn forward_session_lifecycle() {
    let settings = ForwardSettings::new().with_parent_slave_address(0x01);
    let relayed = vec![
        0x00, 0x00, 0x00, 0x00, 0x00, 0x05, 0x01, 0x64, 0x02, 0x03, 0x00,
    ];
    let mut session =
        ForwardSession::new(ScriptedProtocol::answering([Some(relayed)]), settings).unwrap();
    assert_eq!(session.state(), SessionState::Unidentified);

    let unidentified = session.send_request::<[u8; 3], _>(0x03, &READ_THREE);
    assert!(matches!(
        unidentified,
        Err(ModbusError::InvalidOperation { .. })
    ));

    session.identify(0x02).unwrap();
    let response = session
        .send_request::<[u8; 3], _>(0x03, &READ_THREE)
        .unwrap()
        .expect("gateway answered");
    assert_eq!(response.data(), &[0x02, 0x03, 0x00]);

    session.dispose();
    assert_eq!(session.state(), SessionState::Expired);
    let expired = session.send_request::<[u8; 3], _>(0x03, &READ_THREE);
    assert!(matches!(expired, Err(ModbusError::InvalidOperation { .. })));
}
