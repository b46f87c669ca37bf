//! Messages exchanged on `/ws` besides the job events themselves.
//!
//! Server to client: every [`JobEvent`](imagine_core::job_events::JobEvent)
//! verbatim, plus `{"type":"status","job":<snapshot|null>}`.
//! Client to server: `{"type":"request_status"}` with an optional `job_id`.

use imagine_core::job::JobSnapshot;
use imagine_core::job_events::{MSG_TYPE_REQUEST_STATUS, MSG_TYPE_STATUS};
use imagine_core::types::parse_job_id;
use imagine_pipeline::JobRegistry;
use serde::{Deserialize, Serialize};

/// An inbound client frame. Unknown `type` values are ignored.
#[derive(Debug, Deserialize)]
pub struct ClientMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub job_id: Option<String>,
}

impl ClientMessage {
    pub fn is_status_request(&self) -> bool {
        self.msg_type == MSG_TYPE_REQUEST_STATUS
    }
}

/// The `status` reply.
#[derive(Debug, Clone, Serialize)]
pub struct StatusMessage {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub job: Option<JobSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusMessage {
    /// Status of `job_id`, or of the latest job when `None`.
    ///
    /// An unknown or malformed id yields `job: null` with an error text.
    pub fn for_request(registry: &JobRegistry, job_id: Option<&str>) -> Self {
        let lookup = match job_id {
            None => Ok(registry.latest()),
            Some(raw) => parse_job_id(raw)
                .and_then(|id| registry.get_status(id))
                .map(Some),
        };
        match lookup {
            Ok(job) => Self {
                msg_type: MSG_TYPE_STATUS,
                job,
                error: None,
            },
            Err(e) => Self {
                msg_type: MSG_TYPE_STATUS,
                job: None,
                error: Some(e.to_string()),
            },
        }
    }
}
