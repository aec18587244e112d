//! Meta server resolution
//!
//! Asks the configured meta servers for a table's partition configuration.
//! Seeds are tried starting from a random one; a non-leader reply with a
//! leader hint is followed before moving on. The last leader that answered
//! is tried first next time.

use crate::client::pool::SessionPool;
use crate::common::{Error, ErrorCode, Result};
use crate::protocol::{QueryConfigResponse, Request, RequestHeader, Response};
use rand::Rng;
use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

enum MetaReply {
    Config(QueryConfigResponse),
    Forward(Option<String>),
}

pub struct MetaResolver {
    seeds: Vec<String>,
    leader: Mutex<Option<String>>,
}

impl MetaResolver {
    pub fn new(seeds: Vec<String>) -> Self {
        Self {
            seeds,
            leader: Mutex::new(None),
        }
    }

    pub fn seeds(&self) -> &[String] {
        &self.seeds
    }

    pub fn leader(&self) -> Option<String> {
        self.leader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn remember_leader(&self, addr: &str) {
        *self.leader.lock().unwrap_or_else(PoisonError::into_inner) = Some(addr.to_string());
    }

    /// Known leader first, then every seed from a random starting point.
    fn candidates(&self) -> VecDeque<String> {
        let mut candidates = VecDeque::with_capacity(self.seeds.len() + 1);
        if let Some(leader) = self.leader() {
            candidates.push_back(leader);
        }
        if !self.seeds.is_empty() {
            let start = rand::thread_rng().gen_range(0..self.seeds.len());
            candidates.extend(self.seeds.iter().cycle().skip(start).take(self.seeds.len()).cloned());
        }
        candidates
    }

    /// One pass over the meta servers, stopping at `deadline`.
    ///
    /// Each server gets at most `timeout`, clamped to what is left of the
    /// deadline. Fails with `TableNotFound` as soon as any server says the
    /// table does not exist, and with a retryable error when nobody answered.
    pub async fn query_config(
        &self,
        pool: &SessionPool,
        table: &str,
        timeout: Duration,
        deadline: Instant,
    ) -> Result<QueryConfigResponse> {
        let mut queue = self.candidates();
        let mut tried = HashSet::new();
        let mut last_err: Option<Error> = None;

        while let Some(addr) = queue.pop_front() {
            if !tried.insert(addr.clone()) {
                continue;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                last_err = Some(Error::Timeout(format!(
                    "deadline reached before asking meta {}",
                    addr
                )));
                break;
            }

            match self.query_one(pool, &addr, table, timeout.min(remaining)).await {
                Ok(MetaReply::Config(config)) => {
                    self.remember_leader(&addr);
                    tracing::debug!(
                        "Meta {} returned {} partitions for table {}",
                        addr,
                        config.partition_count,
                        table
                    );
                    return Ok(config);
                }
                Ok(MetaReply::Forward(Some(leader))) => {
                    tracing::debug!("Meta {} forwards to leader {}", addr, leader);
                    queue.push_front(leader);
                }
                Ok(MetaReply::Forward(None)) => {
                    last_err = Some(Error::from_code(
                        ErrorCode::ForwardToOthers,
                        format!("meta {} is not the leader", addr),
                    ));
                }
                Err(e @ Error::TableNotFound(_)) => return Err(e),
                Err(e) => {
                    tracing::warn!("Meta server {} failed: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }

        Err(Error::ConnectionFailed(match last_err {
            Some(e) => format!("no meta server answered for table {}: {}", table, e),
            None => format!("no meta server configured for table {}", table),
        }))
    }

    async fn query_one(
        &self,
        pool: &SessionPool,
        addr: &str,
        table: &str,
        timeout: Duration,
    ) -> Result<MetaReply> {
        let started = Instant::now();
        let session = pool.get(addr, timeout).await?;
        let timeout = timeout.saturating_sub(started.elapsed());
        let response = session
            .call(
                RequestHeader::default(),
                Request::QueryConfig {
                    table: table.to_string(),
                },
                timeout,
            )
            .await?;

        match (response.code, response.body) {
            (ErrorCode::Ok, Response::Config(config)) => Ok(MetaReply::Config(config)),
            (ErrorCode::ForwardToOthers, Response::Forward { leader }) => {
                Ok(MetaReply::Forward(leader.filter(|l| !l.is_empty())))
            }
            (ErrorCode::ForwardToOthers, _) => Ok(MetaReply::Forward(None)),
            (ErrorCode::ObjectNotFound, _) => Err(Error::TableNotFound(table.to_string())),
            (ErrorCode::Ok, other) => Err(Error::Protocol(format!(
                "meta {} sent unexpected reply to query_config: {:?}",
                addr, other
            ))),
            (code, _) => Err(Error::from_code(code, format!("query_config on meta {}", addr))),
        }
    }
}
