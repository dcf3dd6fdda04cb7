//! Path-computation service client.
//!
//! Sends an endpoint pair to the external pathfinder and turns its hop
//! lists into validated `Path` values. Hop lists interleave switch-only
//! hops with interface hops; only interface hops pair into links, and
//! the outermost two are the UNI attachment points themselves.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use eline_types::{is_interface_hop, Path};

use crate::error::EvcResult;
use crate::topology::TopologyApi;

/// Client boundary for the external path-computation service.
#[async_trait]
pub trait PathfinderApi: Send + Sync {
    /// Requests candidate hop lists for an endpoint pair.
    ///
    /// An unreachable service or an unusable reply is reported as an
    /// empty candidate list, not an error.
    async fn request_paths(&self, source: &str, destination: &str) -> EvcResult<Vec<Vec<String>>>;
}

#[derive(Debug, Serialize)]
struct PathRequest<'a> {
    source: &'a str,
    destination: &'a str,
}

#[derive(Debug, Deserialize)]
struct PathsReply {
    #[serde(default)]
    paths: Vec<CandidatePath>,
}

#[derive(Debug, Deserialize)]
struct CandidatePath {
    #[serde(default)]
    hops: Vec<String>,
}

/// HTTP client for the pathfinder endpoint.
pub struct HttpPathfinder {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpPathfinder {
    /// Creates a client for the given pathfinder base URL.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl PathfinderApi for HttpPathfinder {
    async fn request_paths(&self, source: &str, destination: &str) -> EvcResult<Vec<Vec<String>>> {
        let request = PathRequest {
            source,
            destination,
        };

        let reply = match self.client.post(&self.endpoint).json(&request).send().await {
            Ok(reply) => reply,
            Err(e) => {
                error!("Failed to reach pathfinder at {}: {}", self.endpoint, e);
                return Ok(vec![]);
            }
        };

        if !reply.status().is_success() {
            error!(
                "Failed to get paths at {}. Returned {}",
                self.endpoint,
                reply.status()
            );
            return Ok(vec![]);
        }

        let reply: PathsReply = match reply.json().await {
            Ok(reply) => reply,
            Err(e) => {
                error!("Unreadable pathfinder reply: {}", e);
                return Ok(vec![]);
            }
        };

        Ok(reply.paths.into_iter().map(|p| p.hops).collect())
    }
}

/// Builds a `Path` from a raw hop list.
///
/// Switch-only hops are discarded. The remaining interface hops must be
/// even in number; the first and last are the UNI attachment points and
/// the interior hops pair into consecutive link endpoints. Returns
/// `None` on an odd count or when any endpoint fails to resolve.
pub fn build_path(hops: &[String], topology: &dyn TopologyApi) -> Option<Path> {
    let clean: Vec<&String> = hops.iter().filter(|hop| is_interface_hop(hop)).collect();

    if clean.len() % 2 != 0 {
        debug!("Discarding hop list with odd interface count");
        return None;
    }

    let mut links = Vec::new();
    let mut index = 1;
    while index + 1 < clean.len() {
        let interface_a = topology.get_interface(clean[index])?;
        let interface_b = topology.get_interface(clean[index + 1])?;
        links.push(topology.link(&interface_a, &interface_b));
        index += 2;
    }

    Some(Path::new(links))
}

/// Asks the pathfinder for the best path between two interfaces.
///
/// Only the first candidate returned by the service is considered.
pub async fn best_path(
    pathfinder: &dyn PathfinderApi,
    topology: &dyn TopologyApi,
    source: &str,
    destination: &str,
) -> Option<Path> {
    let candidates = match pathfinder.request_paths(source, destination).await {
        Ok(candidates) => candidates,
        Err(e) => {
            error!("Path request for {} -> {} failed: {}", source, destination, e);
            return None;
        }
    };

    let first = candidates.first()?;
    build_path(first, topology)
}
