// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! sl-wire: the wire protocols the daemon speaks — control-plane framing,
//! RESP2, and WebSocket. No runtime state lives here, only encode/decode.

pub mod control;
pub mod resp;
pub mod ws;

pub use control::{decode_response, tokenize, ControlDecodeError, ControlResponse, Status};
pub use resp::{parse_views as parse_resp, ParseOutcome as RespOutcome, RespError};
pub use ws::{accept_key as ws_accept_key, parse_frame as parse_ws_frame, Frame as WsFrame, Opcode as WsOpcode, WsError};
