//! `reqwest` clients for the physical-node gateway and the fleet service.
//!
//! Both services answer with `{"SUCCESS": ...}` or `{"FAILURE": "..."}`
//! bodies; a `FAILURE` body or a non-success status is a transport failure,
//! anything else that does not decode is a parse failure.

use super::{CollaboratorResult, FleetService, NodeCandidate, PhysicalNodeGateway, UnblockReceipt};
use crate::calendar::Timestamp;
use crate::error::CollaboratorError;
use crate::task::types::{Robot, TaskId};
use reqwest::{Client, Method};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;
use url::Url;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
struct JsonEndpoint {
    service: &'static str,
    base_url: Url,
    client: Client,
}

impl JsonEndpoint {
    fn new(service: &'static str, base_url: &str, timeout: Duration) -> CollaboratorResult<Self> {
        let mut base_url =
            Url::parse(base_url).map_err(|e| CollaboratorError::rejected(service, format!("invalid url: {e}")))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CollaboratorError::transport(service, e))?;
        Ok(Self {
            service,
            base_url,
            client,
        })
    }

    fn url(&self, path: &str) -> CollaboratorResult<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| CollaboratorError::rejected(self.service, format!("invalid path {path}: {e}")))
    }

    async fn call<T: DeserializeOwned>(&self, method: Method, path: &str, body: Value) -> CollaboratorResult<T> {
        let url = self.url(path)?;
        debug!("{} {} {}", self.service, method, url);

        let response = self
            .client
            .request(method, url)
            .json(&body)
            .send()
            .await
            .map_err(|e| CollaboratorError::transport(self.service, e))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| CollaboratorError::parse(self.service, e))?;

        if let Some(failure) = payload.get("FAILURE") {
            return Err(CollaboratorError::transport(self.service, failure));
        }
        if !status.is_success() {
            return Err(CollaboratorError::transport(self.service, format!("status {status}")));
        }

        let payload = payload.get("SUCCESS").cloned().unwrap_or(payload);
        serde_json::from_value(payload).map_err(|e| CollaboratorError::parse(self.service, e))
    }
}

/// Client of the radio gateway REST interface.
#[derive(Debug, Clone)]
pub struct HttpNodeGateway {
    endpoint: JsonEndpoint,
}

impl HttpNodeGateway {
    pub fn new(base_url: &str) -> CollaboratorResult<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> CollaboratorResult<Self> {
        Ok(Self {
            endpoint: JsonEndpoint::new("node gateway", base_url, timeout)?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RestoreStatus {
    #[serde(default)]
    reserved: bool,
}

#[async_trait::async_trait]
impl PhysicalNodeGateway for HttpNodeGateway {
    async fn poll_free_node(
        &self,
        order_number: TaskId,
        item_descriptor: &str,
    ) -> CollaboratorResult<Vec<NodeCandidate>> {
        let body = json!({ "ordernumber": order_number, "itemdescr": item_descriptor });
        match self.endpoint.call(Method::POST, "gateway/POLL", body).await {
            Ok(candidates) => Ok(candidates),
            // An unanswered poll is reported as FAILURE and means "nothing free yet".
            Err(CollaboratorError::Transport { message, .. }) if message.contains("No data") => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn reserve_node(&self, phyaddr: u16, order_number: TaskId) -> CollaboratorResult<()> {
        let body = json!({ "addr": phyaddr, "ordernumber": order_number, "amount": 0 });
        let _: Value = self.endpoint.call(Method::POST, "gateway/RSVE", body).await?;
        Ok(())
    }

    async fn restore_node(&self, phyaddr: u16) -> CollaboratorResult<()> {
        let body = json!({ "addr": phyaddr, "buttonId": 1 });
        let _: Value = self.endpoint.call(Method::POST, "gateway/BUTN", body).await?;
        Ok(())
    }

    async fn is_returned(&self, phyaddr: u16) -> CollaboratorResult<bool> {
        let status: RestoreStatus = self
            .endpoint
            .call(Method::GET, "gateway/RSTO", json!({ "phyaddr": phyaddr }))
            .await?;
        Ok(!status.reserved)
    }
}

/// Client of the fleet management REST interface.
#[derive(Debug, Clone)]
pub struct HttpFleetService {
    endpoint: JsonEndpoint,
}

impl HttpFleetService {
    pub fn new(base_url: &str) -> CollaboratorResult<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> CollaboratorResult<Self> {
        Ok(Self {
            endpoint: JsonEndpoint::new("fleet", base_url, timeout)?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct StartTime {
    completion_time: Timestamp,
}

#[async_trait::async_trait]
impl FleetService for HttpFleetService {
    async fn claim_robot(&self, task_id: TaskId) -> CollaboratorResult<Option<Robot>> {
        match self
            .endpoint
            .call(Method::POST, "fms/api/taskrobot/block", json!({ "task_id": task_id }))
            .await
        {
            Ok(robot) => Ok(Some(robot)),
            // The fleet answers FAILURE while every robot is blocked.
            Err(CollaboratorError::Transport { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn request_initial_start_time(
        &self,
        robot_id: &str,
        carrier_id: &str,
        targets: &[String],
    ) -> CollaboratorResult<Timestamp> {
        let body = json!({ "robot_id": robot_id, "klt_id": carrier_id, "target": targets });
        let answer: StartTime = self
            .endpoint
            .call(Method::POST, "fms/api/taskrobot/start_time", body)
            .await?;
        Ok(answer.completion_time)
    }

    async fn dispatch_robot(&self, robot_id: &str, target: &str) -> CollaboratorResult<()> {
        let body = json!({ "robot_id": robot_id, "target": target });
        let _: Value = self
            .endpoint
            .call(Method::POST, "fms/api/robot/drive_to_workstation", body)
            .await?;
        Ok(())
    }

    async fn unblock_robot(
        &self,
        robot_id: &str,
        task_end_time: Timestamp,
        last_target: Option<&str>,
    ) -> CollaboratorResult<UnblockReceipt> {
        let body = json!({
            "robot_id": robot_id,
            "task_end_time": task_end_time,
            "workstation_vicon_id": last_target,
        });
        self.endpoint
            .call(Method::POST, "fms/api/taskrobot/unblock", body)
            .await
    }
}
