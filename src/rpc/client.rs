//! Keeper client over the agent's UNIX socket.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::keeper::BuildEnv;
use crate::plugin;
use crate::secrets::{Keeper, Secret, SecretError, SecretResult};

use super::proto::{Request, Response, ServiceInfo, WireSecret};

/// The configuration type string for the agent client keeper.
pub const TYPE: &str = "agent";

type Transport = Framed<UnixStream, LengthDelimitedCodec>;

/// A keeper that forwards every operation to the running agent.
///
/// The connection is dialed lazily and reused across calls; one call runs
/// at a time per client, matching the wire protocol's one-outstanding-
/// request framing. A transport failure drops the connection so the next
/// call redials.
pub struct RpcKeeper {
    path: PathBuf,
    conn: Mutex<Option<Transport>>,
}

impl RpcKeeper {
    /// A client for the socket at the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            conn: Mutex::new(None),
        }
    }

    /// A client for this user's default agent socket.
    pub fn for_current_user() -> Self {
        Self::new(super::socket_path())
    }

    async fn request(&self, request: &Request) -> SecretResult<Vec<Response>> {
        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            let stream = UnixStream::connect(&self.path).await.map_err(|err| {
                SecretError::ServiceUnavailable(format!(
                    "unable to reach agent at {:?}: {}",
                    self.path, err
                ))
            })?;
            *guard = Some(Framed::new(stream, LengthDelimitedCodec::new()));
        }

        let Some(transport) = guard.as_mut() else {
            return Err(SecretError::ServiceUnavailable(
                "agent connection lost".to_string(),
            ));
        };

        match self.exchange(transport, request).await {
            Ok(responses) => Ok(responses),
            Err(err) => {
                // Drop the broken connection so the next call redials.
                *guard = None;
                Err(err)
            }
        }
    }

    async fn exchange(
        &self,
        transport: &mut Transport,
        request: &Request,
    ) -> SecretResult<Vec<Response>> {
        let bytes = serde_json::to_vec(request)
            .map_err(|err| SecretError::Serialization(err.to_string()))?;
        transport
            .send(bytes.into())
            .await
            .map_err(|err| SecretError::ServiceUnavailable(err.to_string()))?;

        let streaming = matches!(
            request,
            Request::ListLocations | Request::ListSecrets { .. } | Request::GetSecretsByName { .. }
        );

        let mut responses = Vec::new();
        loop {
            let frame = transport
                .next()
                .await
                .ok_or_else(|| {
                    SecretError::ServiceUnavailable("agent closed the connection".to_string())
                })?
                .map_err(|err| SecretError::ServiceUnavailable(err.to_string()))?;
            let response: Response = serde_json::from_slice(&frame)
                .map_err(|err| SecretError::Serialization(err.to_string()))?;

            match response {
                Response::Error { error } => return Err(error.into()),
                Response::End => break,
                other => {
                    responses.push(other);
                    if !streaming {
                        break;
                    }
                }
            }
        }
        Ok(responses)
    }

    async fn unary(&self, request: Request) -> SecretResult<Response> {
        let mut responses = self.request(&request).await?;
        responses
            .pop()
            .ok_or_else(|| SecretError::backend("agent sent no response", None))
    }

    async fn unary_secret(&self, request: Request) -> SecretResult<Secret> {
        match self.unary(request).await? {
            Response::Secret { secret } => Ok(secret.into_secret()),
            other => Err(unexpected(&other)),
        }
    }

    /// Ask the agent about itself.
    pub async fn service_info(&self) -> SecretResult<ServiceInfo> {
        match self.unary(Request::GetServiceInfo).await? {
            Response::Info { info } => Ok(info),
            other => Err(unexpected(&other)),
        }
    }
}

fn unexpected(response: &Response) -> SecretError {
    SecretError::backend(format!("unexpected response from agent: {:?}", response), None)
}

impl std::fmt::Debug for RpcKeeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcKeeper").field("path", &self.path).finish()
    }
}

#[async_trait]
impl Keeper for RpcKeeper {
    async fn list_locations(&self) -> SecretResult<Vec<String>> {
        let responses = self.request(&Request::ListLocations).await?;
        responses
            .into_iter()
            .map(|resp| match resp {
                Response::Location { location } => Ok(location),
                other => Err(unexpected(&other)),
            })
            .collect()
    }

    async fn list_secrets(&self, location: &str) -> SecretResult<Vec<String>> {
        let responses = self
            .request(&Request::ListSecrets {
                location: location.to_string(),
            })
            .await?;
        responses
            .into_iter()
            .map(|resp| match resp {
                Response::Id { id } => Ok(id),
                other => Err(unexpected(&other)),
            })
            .collect()
    }

    async fn get_secret(&self, id: &str) -> SecretResult<Secret> {
        self.unary_secret(Request::GetSecret { id: id.to_string() })
            .await
    }

    async fn get_secrets_by_name(&self, name: &str) -> SecretResult<Vec<Secret>> {
        let responses = self
            .request(&Request::GetSecretsByName {
                name: name.to_string(),
            })
            .await?;
        responses
            .into_iter()
            .map(|resp| match resp {
                Response::Secret { secret } => Ok(secret.into_secret()),
                other => Err(unexpected(&other)),
            })
            .collect()
    }

    async fn set_secret(&self, secret: Secret) -> SecretResult<Secret> {
        self.unary_secret(Request::SetSecret {
            secret: WireSecret::from(&secret),
        })
        .await
    }

    async fn copy_secret(&self, id: &str, location: &str) -> SecretResult<Secret> {
        self.unary_secret(Request::CopySecret {
            id: id.to_string(),
            location: location.to_string(),
        })
        .await
    }

    async fn move_secret(&self, id: &str, location: &str) -> SecretResult<Secret> {
        self.unary_secret(Request::MoveSecret {
            id: id.to_string(),
            location: location.to_string(),
        })
        .await
    }

    async fn delete_secret(&self, id: &str) -> SecretResult<()> {
        match self
            .unary(Request::DeleteSecret { id: id.to_string() })
            .await?
        {
            Response::Unit => Ok(()),
            other => Err(unexpected(&other)),
        }
    }
}

/// Configuration for the agent client keeper.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentConfig {
    /// Socket path override; defaults to this user's agent socket.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket: Option<String>,
}

fn build(env: &mut BuildEnv, value: serde_yaml::Value) -> plugin::BuildFuture<'_> {
    Box::pin(async move {
        let cfg: AgentConfig = env.decode(value)?;
        let client = match cfg.socket {
            Some(path) => RpcKeeper::new(path),
            None => RpcKeeper::for_current_user(),
        };
        Ok(Arc::new(client) as Arc<dyn Keeper>)
    })
}

fn validate(env: &mut BuildEnv, value: serde_yaml::Value) -> plugin::ValidateFuture<'_> {
    Box::pin(async move {
        let _: AgentConfig = env.decode(value)?;
        Ok(())
    })
}

/// Register the agent client keeper type.
pub(crate) fn register_plugin() {
    plugin::register(
        TYPE,
        plugin::RegisteredPlugin {
            description: "Forward operations to the running ghost agent",
            builder: build,
            validator: Some(validate),
        },
    );
}
