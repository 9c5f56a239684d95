//! Wire protocol client
//!
//! The gateway side of the protocol. One request is in flight per
//! connection; responses are read with a single `read`, matching the
//! length-framed server.

use crate::{
    codec::Record,
    protocol::{Request, Response, MAX_RESPONSE_LEN},
    types::{AccountId, LimitAndBalance, Statement, Transaction},
    Error, Result,
};
use chrono::Utc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};

/// Connection to a ledger server
#[derive(Debug)]
pub struct LedgerClient {
    stream: TcpStream,
}

impl LedgerClient {
    /// Connect to `addr`
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }

    /// Submit a transaction
    ///
    /// The transaction is validated locally first; invalid ones never reach
    /// the server.
    pub async fn save(&mut self, account: AccountId, tx: &Transaction) -> Result<LimitAndBalance> {
        tx.validate()?;

        let frame = Request::Save(Record::encode(account, tx)).encode();
        match self.round_trip(&frame).await? {
            Response::Ok { limit, balance, .. } => Ok(LimitAndBalance {
                limit: limit.into(),
                balance: balance.into(),
            }),
            Response::Error(code) => Err(code.into_error(account)),
        }
    }

    /// Fetch a statement
    pub async fn extract(&mut self, account: AccountId) -> Result<Statement> {
        let frame = Request::Extract(account).encode();
        match self.round_trip(&frame).await? {
            Response::Ok {
                limit,
                balance,
                records,
            } => {
                let recent = records
                    .iter()
                    .map(|r| r.decode().into_transaction().map(|(_, tx)| tx))
                    .collect::<Result<Vec<_>>>()?;

                Ok(Statement {
                    limit: limit.into(),
                    balance: balance.into(),
                    as_of: Utc::now(),
                    recent,
                })
            }
            Response::Error(code) => Err(code.into_error(account)),
        }
    }

    /// Send a raw frame without waiting for a reply
    pub async fn send_raw(&mut self, frame: &[u8]) -> Result<()> {
        self.stream.write_all(frame).await?;
        Ok(())
    }

    async fn round_trip(&mut self, frame: &[u8]) -> Result<Response> {
        self.stream.write_all(frame).await?;

        let mut buf = [0u8; MAX_RESPONSE_LEN];
        let n = self.stream.read(&mut buf).await?;
        if n == 0 {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "server closed the connection",
            )));
        }

        Response::parse(&buf[..n])
    }
}
