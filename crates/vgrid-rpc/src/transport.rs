//! JSON-over-HTTP/1 transport for partition-server RPCs.
//!
//! Every call opens a fresh connection: `POST http://{addr}/ps/{method}`
//! with a JSON body, answered by a [`Reply`] envelope.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use vgrid_meta::{MemberOp, NodeId, PartitionId, Space};

use crate::client::PartitionServerClient;
use crate::error::{RpcError, RpcResult};
use crate::types::*;

const USER_AGENT: &str = "vgrid-master/0.1";

#[derive(Debug, Clone)]
pub struct HttpPartitionClient {
    timeout: Duration,
    live_timeout: Duration,
}

impl Default for HttpPartitionClient {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            live_timeout: Duration::from_secs(1),
        }
    }
}

impl HttpPartitionClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_live_timeout(mut self, timeout: Duration) -> Self {
        self.live_timeout = timeout;
        self
    }

    async fn call<Req, Resp>(&self, addr: &str, method: &str, body: &Req) -> RpcResult<Option<Resp>>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let payload = serde_json::to_vec(body).map_err(|e| RpcError::Decode {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?;
        let raw = tokio::time::timeout(self.timeout, post(addr, method, payload))
            .await
            .map_err(|_| RpcError::Timeout {
                addr: addr.to_string(),
            })??;

        let reply: Reply<Resp> = serde_json::from_slice(&raw).map_err(|e| RpcError::Decode {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?;
        if reply.code != 0 {
            debug!(%addr, method, code = reply.code, msg = %reply.msg, "rpc returned error");
            return Err(RpcError::Remote {
                addr: addr.to_string(),
                code: reply.code,
                message: reply.msg,
            });
        }
        Ok(reply.data)
    }

    async fn call_unit<Req: Serialize + Sync>(&self, addr: &str, method: &str, body: &Req) -> RpcResult<()> {
        self.call::<Req, serde_json::Value>(addr, method, body).await?;
        Ok(())
    }

    async fn call_data<Req, Resp>(&self, addr: &str, method: &str, body: &Req) -> RpcResult<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        self.call(addr, method, body).await?.ok_or_else(|| RpcError::Decode {
            addr: addr.to_string(),
            reason: format!("{method} reply carried no data"),
        })
    }
}

async fn post(addr: &str, method: &str, payload: Vec<u8>) -> RpcResult<Bytes> {
    let uri = format!("http://{addr}/ps/{method}");

    let stream = tokio::net::TcpStream::connect(addr)
        .await
        .map_err(|e| RpcError::unreachable(addr, e))?;
    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| RpcError::unreachable(addr, e))?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let req = http::Request::builder()
        .method("POST")
        .uri(&uri)
        .header("host", addr)
        .header("user-agent", USER_AGENT)
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(payload)))
        .map_err(|e| RpcError::Decode {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?;

    let resp = sender
        .send_request(req)
        .await
        .map_err(|e| RpcError::unreachable(addr, e))?;
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .map_err(|e| RpcError::unreachable(addr, e))?
        .to_bytes();
    if !status.is_success() {
        return Err(RpcError::Remote {
            addr: addr.to_string(),
            code: i32::from(status.as_u16()),
            message: String::from_utf8_lossy(&body).into_owned(),
        });
    }
    Ok(body)
}

#[async_trait]
impl PartitionServerClient for HttpPartitionClient {
    async fn create_partition(&self, addr: &str, space: &Space, partition_id: PartitionId) -> RpcResult<()> {
        let req = PartitionRequest {
            partition_id,
            space: Some(space.clone()),
        };
        self.call_unit(addr, "create_partition", &req).await
    }

    async fn delete_partition(&self, addr: &str, partition_id: PartitionId) -> RpcResult<()> {
        let req = PartitionRequest {
            partition_id,
            space: None,
        };
        self.call_unit(addr, "delete_partition", &req).await
    }

    async fn update_partition(&self, addr: &str, space: &Space, partition_id: PartitionId) -> RpcResult<()> {
        let req = PartitionRequest {
            partition_id,
            space: Some(space.clone()),
        };
        self.call_unit(addr, "update_partition", &req).await
    }

    async fn change_member(
        &self,
        leader_addr: &str,
        partition_id: PartitionId,
        node_id: NodeId,
        op: MemberOp,
    ) -> RpcResult<()> {
        let req = ChangeMemberRequest {
            partition_id,
            node_id,
            op,
        };
        self.call_unit(leader_addr, "change_member", &req).await
    }

    async fn delete_replica(&self, addr: &str, partition_id: PartitionId) -> RpcResult<()> {
        let req = PartitionRequest {
            partition_id,
            space: None,
        };
        self.call_unit(addr, "delete_replica", &req).await
    }

    async fn partition_info(&self, addr: &str, partition_id: PartitionId, verbose: bool) -> RpcResult<PartitionStatus> {
        let req = PartitionInfoRequest { partition_id, verbose };
        self.call_data(addr, "partition_info", &req).await
    }

    async fn get_engine_cfg(&self, addr: &str, partition_id: PartitionId) -> RpcResult<serde_json::Value> {
        let req = EngineCfgRequest {
            partition_id,
            cfg: None,
        };
        self.call_data(addr, "get_engine_cfg", &req).await
    }

    async fn update_engine_cfg(
        &self,
        addr: &str,
        partition_id: PartitionId,
        cfg: &serde_json::Value,
    ) -> RpcResult<()> {
        let req = EngineCfgRequest {
            partition_id,
            cfg: Some(cfg.clone()),
        };
        self.call_unit(addr, "update_engine_cfg", &req).await
    }

    async fn resource_limit(&self, addr: &str, partition_id: PartitionId, limits: &ResourceLimits) -> RpcResult<()> {
        let req = ResourceLimitRequest {
            partition_id,
            limits: limits.clone(),
        };
        self.call_unit(addr, "resource_limit", &req).await
    }

    async fn backup_space(&self, addr: &str, request: &BackupRequest, partition_id: PartitionId) -> RpcResult<()> {
        let req = BackupSpaceRequest {
            partition_id,
            request: request.clone(),
        };
        self.call_unit(addr, "backup_space", &req).await
    }

    async fn server_stats(&self, addr: &str) -> RpcResult<ServerStats> {
        self.call_data(addr, "server_stats", &serde_json::json!({})).await
    }

    async fn is_live(&self, addr: &str) -> bool {
        matches!(
            tokio::time::timeout(self.live_timeout, tokio::net::TcpStream::connect(addr)).await,
            Ok(Ok(_))
        )
    }
}
