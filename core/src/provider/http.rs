//! JSON-over-HTTP fleet provider client.
//!
//! Blocking `ureq` client authenticated with a bearer API key. HTTP 404, or
//! an error body carrying `"code": 404`, maps to `ProviderError::NotFound`.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    filter_by_status, DeleteRequest, FleetProvider, Instance, InstanceRequest, InstanceStatus,
    Project, ProviderError, User,
};


#[derive(Deserialize)]
struct UserEnvelope {
    user: User,
}

#[derive(Deserialize)]
struct CreatedUser {
    user_id: u64,
}

#[derive(Deserialize)]
struct InstanceList {
    #[serde(default)]
    instances: Vec<Instance>,
}

#[derive(Serialize)]
struct CreateUserBody<'a> {
    username: &'a str,
}

#[derive(Serialize)]
struct CreateProjectBody<'a> {
    name: &'a str,
    description: &'a str,
    owner_id: u64,
}


/// Production `FleetProvider` speaking to the fleet API over HTTP.
pub struct HttpProvider {
    agent: ureq::Agent,
    base_url: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for HttpProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProvider")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl HttpProvider {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        HttpProvider {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: &str, path: &str) -> ureq::Request {
        let req = self.agent.request(method, &self.url(path));
        match self.api_key {
            Some(ref key) => req.set("Authorization", &format!("Bearer {}", key)),
            None => req,
        }
    }

    fn fetch<T: DeserializeOwned>(&self, req: ureq::Request, resource: &str) -> Result<T, ProviderError> {
        debug!(url = req.url(), "provider request");
        let response = req.call().map_err(|e| map_error(e, resource))?;
        response
            .into_json::<T>()
            .map_err(|e| ProviderError::Decode(format!("{}: {}", resource, e)))
    }

    fn send<B: Serialize, T: DeserializeOwned>(
        &self,
        req: ureq::Request,
        body: &B,
        resource: &str,
    ) -> Result<T, ProviderError> {
        debug!(url = req.url(), "provider request");
        let response = req.send_json(body).map_err(|e| map_error(e, resource))?;
        response
            .into_json::<T>()
            .map_err(|e| ProviderError::Decode(format!("{}: {}", resource, e)))
    }

    fn send_ack<B: Serialize>(&self, req: ureq::Request, body: &B, resource: &str) -> Result<(), ProviderError> {
        debug!(url = req.url(), "provider request");
        req.send_json(body).map_err(|e| map_error(e, resource))?;
        Ok(())
    }
}

impl FleetProvider for HttpProvider {
    fn get_user(&self, username: &str) -> Result<User, ProviderError> {
        let req = self.request("GET", "users").query("username", username);
        let envelope: UserEnvelope = self.fetch(req, &format!("user '{}'", username))?;
        Ok(envelope.user)
    }

    fn create_user(&self, username: &str) -> Result<User, ProviderError> {
        let req = self.request("POST", "users");
        let created: CreatedUser = self.send(req, &CreateUserBody { username }, "user")?;
        Ok(User {
            id: created.user_id,
            username: username.to_string(),
        })
    }

    fn get_project(&self, name: &str, owner_id: u64) -> Result<Project, ProviderError> {
        let req = self
            .request("GET", &format!("projects/{}", name))
            .query("owner_id", &owner_id.to_string());
        self.fetch(req, &format!("project '{}'", name))
    }

    fn create_project(&self, name: &str, description: &str, owner_id: u64) -> Result<Project, ProviderError> {
        let req = self.request("POST", "projects");
        let body = CreateProjectBody {
            name,
            description,
            owner_id,
        };
        self.send(req, &body, "project")
    }

    fn create_instances(&self, requests: &[InstanceRequest]) -> Result<(), ProviderError> {
        let req = self.request("POST", "instances");
        self.send_ack(req, &requests, "instances")
    }

    fn list_instances(
        &self,
        project: &str,
        owner_id: u64,
        statuses: &[InstanceStatus],
    ) -> Result<Vec<Instance>, ProviderError> {
        let req = self
            .request("GET", &format!("projects/{}/instances", project))
            .query("owner_id", &owner_id.to_string());
        let list: InstanceList = self.fetch(req, &format!("instances of project '{}'", project))?;
        Ok(filter_by_status(list.instances, statuses))
    }

    fn get_instance(&self, id: u64) -> Result<Instance, ProviderError> {
        let req = self.request("GET", &format!("instances/{}", id));
        self.fetch(req, &format!("instance {}", id))
    }

    fn delete_instances(&self, request: &DeleteRequest) -> Result<(), ProviderError> {
        let req = self.request("DELETE", "instances");
        self.send_ack(req, request, "instances")
    }
}


fn map_error(err: ureq::Error, resource: &str) -> ProviderError {
    match err {
        ureq::Error::Status(status, response) => {
            let body = response.into_string().unwrap_or_default();
            if status == 404 || body_reports_not_found(&body) {
                ProviderError::NotFound {
                    resource: resource.to_string(),
                }
            } else {
                ProviderError::Api {
                    status,
                    message: body.trim().to_string(),
                }
            }
        }
        ureq::Error::Transport(t) => ProviderError::Transport(t.to_string()),
    }
}


/// Some API gateways wrap a 404 from the backend in a different status and
/// report the real code in the body.
fn body_reports_not_found(body: &str) -> bool {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return false;
    };
    let code = value
        .get("code")
        .or_else(|| value.get("error").and_then(|e| e.get("code")));
    code.and_then(|c| c.as_u64()) == Some(404)
}
