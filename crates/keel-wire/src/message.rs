//! Request/response messages carried by keel frames.
//!
//! # Purpose
//! Defines the tagged unions a consensus engine exchanges with its
//! application over a keel connection, plus the variant-pairing predicate
//! the client uses to detect pipeline desynchronization.
//!
//! # Design notes
//! Responses carry no correlation ids: the protocol answers requests in
//! strict FIFO order and ordering alone is the match. `Exception` is the one
//! response that may arrive in any position; it pairs with nothing and is
//! terminal for the connection.
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{Direction, Error, Frame, Result};

/// Result code signalling success.
pub const CODE_OK: u32 = 0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub pub_key: Bytes,
    pub power: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub chain_id: String,
    pub height: u64,
    /// Unix time of the block, in seconds.
    pub time: u64,
    pub num_txs: u64,
    pub app_hash: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryParams {
    pub data: Bytes,
    pub path: String,
    pub height: u64,
    pub prove: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoResult {
    pub data: String,
    pub version: String,
    pub last_block_height: u64,
    pub last_block_app_hash: Bytes,
}

/// Outcome of a transaction-shaped operation (deliver, check, commit).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxResult {
    pub code: u32,
    pub data: Bytes,
    pub log: String,
}

impl TxResult {
    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResult {
    pub code: u32,
    pub index: u64,
    pub key: Bytes,
    pub value: Bytes,
    pub proof: Bytes,
    pub height: u64,
    pub log: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    Echo { message: String },
    Flush,
    Info { version: String },
    SetOption { key: String, value: String },
    DeliverTx { tx: Bytes },
    CheckTx { tx: Bytes },
    Commit,
    Query(QueryParams),
    InitChain { validators: Vec<Validator> },
    BeginBlock { hash: Bytes, header: BlockHeader },
    EndBlock { height: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Echo { message: String },
    Flush,
    Info(InfoResult),
    SetOption { log: String },
    DeliverTx(TxResult),
    CheckTx(TxResult),
    Commit(TxResult),
    Query(QueryResult),
    InitChain,
    BeginBlock,
    EndBlock { validator_updates: Vec<Validator> },
    /// Terminal application-level failure; may arrive in any position.
    Exception { error: String },
}

impl Request {
    pub fn encode(&self) -> Result<Frame> {
        let payload = bincode::serialize(self).map_err(|e| Error::Codec(e.to_string()))?;
        Frame::new(Direction::Request, payload.into())
    }

    pub fn decode(frame: Frame) -> Result<Self> {
        if frame.header.direction != Direction::Request {
            return Err(Error::Direction {
                expected: Direction::Request,
                got: frame.header.direction,
            });
        }
        bincode::deserialize(&frame.payload).map_err(|e| Error::Codec(e.to_string()))
    }

    pub fn is_flush(&self) -> bool {
        matches!(self, Request::Flush)
    }

    /// Variant name, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Echo { .. } => "Echo",
            Request::Flush => "Flush",
            Request::Info { .. } => "Info",
            Request::SetOption { .. } => "SetOption",
            Request::DeliverTx { .. } => "DeliverTx",
            Request::CheckTx { .. } => "CheckTx",
            Request::Commit => "Commit",
            Request::Query(_) => "Query",
            Request::InitChain { .. } => "InitChain",
            Request::BeginBlock { .. } => "BeginBlock",
            Request::EndBlock { .. } => "EndBlock",
        }
    }
}

impl Response {
    pub fn encode(&self) -> Result<Frame> {
        let payload = bincode::serialize(self).map_err(|e| Error::Codec(e.to_string()))?;
        Frame::new(Direction::Response, payload.into())
    }

    pub fn decode(frame: Frame) -> Result<Self> {
        if frame.header.direction != Direction::Response {
            return Err(Error::Direction {
                expected: Direction::Response,
                got: frame.header.direction,
            });
        }
        bincode::deserialize(&frame.payload).map_err(|e| Error::Codec(e.to_string()))
    }

    /// Variant name, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Response::Echo { .. } => "Echo",
            Response::Flush => "Flush",
            Response::Info(_) => "Info",
            Response::SetOption { .. } => "SetOption",
            Response::DeliverTx(_) => "DeliverTx",
            Response::CheckTx(_) => "CheckTx",
            Response::Commit(_) => "Commit",
            Response::Query(_) => "Query",
            Response::InitChain => "InitChain",
            Response::BeginBlock => "BeginBlock",
            Response::EndBlock { .. } => "EndBlock",
            Response::Exception { .. } => "Exception",
        }
    }
}

/// True iff `res` is the response variant paired with `req`.
///
/// `Exception` pairs with nothing: it is handled before matching and is
/// fatal wherever it appears.
pub fn matches(req: &Request, res: &Response) -> bool {
    matches!(
        (req, res),
        (Request::Echo { .. }, Response::Echo { .. })
            | (Request::Flush, Response::Flush)
            | (Request::Info { .. }, Response::Info(_))
            | (Request::SetOption { .. }, Response::SetOption { .. })
            | (Request::DeliverTx { .. }, Response::DeliverTx(_))
            | (Request::CheckTx { .. }, Response::CheckTx(_))
            | (Request::Commit, Response::Commit(_))
            | (Request::Query(_), Response::Query(_))
            | (Request::InitChain { .. }, Response::InitChain)
            | (Request::BeginBlock { .. }, Response::BeginBlock)
            | (Request::EndBlock { .. }, Response::EndBlock { .. })
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trip() {
        let request = Request::Echo {
            message: "ping".to_string(),
        };
        let frame = request.encode().expect("encode");
        assert_eq!(frame.header.direction, Direction::Request);
        let decoded = Request::decode(frame).expect("decode");
        assert_eq!(decoded, request);
    }

    #[test]
    fn response_round_trip() {
        let response = Response::Query(QueryResult {
            code: CODE_OK,
            index: 3,
            key: Bytes::from_static(b"k"),
            value: Bytes::from_static(b"v"),
            proof: Bytes::new(),
            height: 10,
            log: String::new(),
        });
        let frame = response.encode().expect("encode");
        assert_eq!(frame.header.direction, Direction::Response);
        let decoded = Response::decode(frame).expect("decode");
        assert_eq!(decoded, response);
    }

    #[test]
    fn decode_checks_direction() {
        // A request frame must not decode as a response, and vice versa.
        let frame = Request::Flush.encode().expect("encode");
        let err = Response::decode(frame).expect_err("wrong direction");
        assert!(matches!(
            err,
            Error::Direction {
                expected: Direction::Response,
                got: Direction::Request,
            }
        ));

        let frame = Response::Flush.encode().expect("encode");
        let err = Request::decode(frame).expect_err("wrong direction");
        assert!(matches!(
            err,
            Error::Direction {
                expected: Direction::Request,
                got: Direction::Response,
            }
        ));
    }

    #[test]
    fn decode_rejects_garbage_payload() {
        let frame =
            Frame::new(Direction::Response, Bytes::from_static(&[0xFF; 3])).expect("frame");
        let err = Response::decode(frame).expect_err("garbage");
        assert!(matches!(err, Error::Codec(_)));
    }

    #[test]
    fn matches_pairs_every_variant_with_its_tag() {
        let pairs: Vec<(Request, Response)> = vec![
            (
                Request::Echo {
                    message: "m".into(),
                },
                Response::Echo {
                    message: "m".into(),
                },
            ),
            (Request::Flush, Response::Flush),
            (
                Request::Info {
                    version: "0.1".into(),
                },
                Response::Info(InfoResult {
                    data: String::new(),
                    version: String::new(),
                    last_block_height: 0,
                    last_block_app_hash: Bytes::new(),
                }),
            ),
            (
                Request::SetOption {
                    key: "k".into(),
                    value: "v".into(),
                },
                Response::SetOption { log: String::new() },
            ),
            (
                Request::DeliverTx {
                    tx: Bytes::from_static(b"tx"),
                },
                Response::DeliverTx(TxResult::default()),
            ),
            (
                Request::CheckTx {
                    tx: Bytes::from_static(b"tx"),
                },
                Response::CheckTx(TxResult::default()),
            ),
            (Request::Commit, Response::Commit(TxResult::default())),
            (
                Request::Query(QueryParams {
                    data: Bytes::new(),
                    path: "/store".into(),
                    height: 0,
                    prove: false,
                }),
                Response::Query(QueryResult::default()),
            ),
            (
                Request::InitChain { validators: vec![] },
                Response::InitChain,
            ),
            (
                Request::BeginBlock {
                    hash: Bytes::new(),
                    header: BlockHeader {
                        chain_id: "test".into(),
                        height: 1,
                        time: 0,
                        num_txs: 0,
                        app_hash: Bytes::new(),
                    },
                },
                Response::BeginBlock,
            ),
            (
                Request::EndBlock { height: 1 },
                Response::EndBlock {
                    validator_updates: vec![],
                },
            ),
        ];
        for (req, res) in &pairs {
            assert!(matches(req, res), "{} should match {}", req.kind(), res.kind());
        }
        // Off-by-one pairings must not match.
        for (i, (req, _)) in pairs.iter().enumerate() {
            let (_, wrong) = &pairs[(i + 1) % pairs.len()];
            assert!(
                !matches(req, wrong),
                "{} must not match {}",
                req.kind(),
                wrong.kind()
            );
        }
    }

    #[test]
    fn exception_matches_nothing() {
        let exception = Response::Exception {
            error: "boom".into(),
        };
        assert!(!matches(&Request::Flush, &exception));
        assert!(!matches(
            &Request::Echo {
                message: "m".into()
            },
            &exception
        ));
    }
}
