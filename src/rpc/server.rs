//! Serving the keeper contract over a UNIX socket.

use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinSet;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;

use crate::secrets::{Keeper, SecretResult};

use super::proto::{Request, Response, ServiceInfo, WireError, WireSecret};

type Transport = Framed<UnixStream, LengthDelimitedCodec>;

/// Serve the keeper over the given listener until told to stop.
///
/// `graceful` stops the accept loop and drains in-flight connections;
/// `quick` aborts them. Each connection handles its requests in order, so
/// one caller observes program order while independent callers proceed in
/// parallel.
pub async fn serve(
    listener: UnixListener,
    keeper: Arc<dyn Keeper>,
    info: ServiceInfo,
    graceful: CancellationToken,
    quick: CancellationToken,
) -> std::io::Result<()> {
    let mut connections: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            _ = quick.cancelled() => {
                connections.shutdown().await;
                return Ok(());
            }
            _ = graceful.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted?;
                let keeper = keeper.clone();
                let info = info.clone();
                let quick = quick.clone();
                connections.spawn(async move {
                    tokio::select! {
                        _ = quick.cancelled() => {}
                        result = handle_connection(stream, keeper, info) => {
                            if let Err(err) = result {
                                tracing::debug!(error = %err, "connection ended with error");
                            }
                        }
                    }
                });
            }
        }
    }

    // Graceful drain: wait for in-flight connections unless a quick stop
    // arrives meanwhile.
    tokio::select! {
        _ = quick.cancelled() => connections.shutdown().await,
        _ = async { while connections.join_next().await.is_some() {} } => {}
    }
    Ok(())
}

async fn handle_connection(
    stream: UnixStream,
    keeper: Arc<dyn Keeper>,
    info: ServiceInfo,
) -> std::io::Result<()> {
    let mut transport = Framed::new(stream, LengthDelimitedCodec::new());

    while let Some(frame) = transport.next().await {
        let frame = frame?;
        let request: Request = match serde_json::from_slice(&frame) {
            Ok(req) => req,
            Err(err) => {
                tracing::warn!(error = %err, "unreadable request frame");
                let error = WireError {
                    kind: super::proto::WireErrorKind::Backend,
                    message: format!("unreadable request: {}", err),
                    status_code: None,
                };
                send(&mut transport, &Response::Error { error }).await?;
                continue;
            }
        };

        handle_request(&mut transport, keeper.as_ref(), &info, request).await?;
    }
    Ok(())
}

async fn handle_request(
    transport: &mut Transport,
    keeper: &dyn Keeper,
    info: &ServiceInfo,
    request: Request,
) -> std::io::Result<()> {
    match request {
        Request::ListLocations => {
            stream_result(
                transport,
                keeper.list_locations().await,
                |location| Response::Location { location },
            )
            .await
        }
        Request::ListSecrets { location } => {
            stream_result(transport, keeper.list_secrets(&location).await, |id| {
                Response::Id { id }
            })
            .await
        }
        Request::GetSecretsByName { name } => {
            stream_result(transport, keeper.get_secrets_by_name(&name).await, |sec| {
                Response::Secret {
                    secret: WireSecret::from(&sec),
                }
            })
            .await
        }
        Request::GetSecret { id } => {
            unary_secret(transport, keeper.get_secret(&id).await).await
        }
        Request::SetSecret { secret } => {
            unary_secret(transport, keeper.set_secret(secret.into_secret()).await).await
        }
        Request::CopySecret { id, location } => {
            unary_secret(transport, keeper.copy_secret(&id, &location).await).await
        }
        Request::MoveSecret { id, location } => {
            unary_secret(transport, keeper.move_secret(&id, &location).await).await
        }
        Request::DeleteSecret { id } => {
            let response = match keeper.delete_secret(&id).await {
                Ok(()) => Response::Unit,
                Err(err) => Response::Error {
                    error: WireError::from(&err),
                },
            };
            send(transport, &response).await
        }
        Request::GetServiceInfo => {
            send(
                transport,
                &Response::Info {
                    info: info.clone(),
                },
            )
            .await
        }
    }
}

/// Send the elements of a list result one frame at a time, closing with
/// an end-of-stream frame, or a single error frame.
async fn stream_result<T>(
    transport: &mut Transport,
    result: SecretResult<Vec<T>>,
    element: impl Fn(T) -> Response,
) -> std::io::Result<()> {
    match result {
        Ok(items) => {
            for item in items {
                send(transport, &element(item)).await?;
            }
            send(transport, &Response::End).await
        }
        Err(err) => {
            send(
                transport,
                &Response::Error {
                    error: WireError::from(&err),
                },
            )
            .await
        }
    }
}

async fn unary_secret(
    transport: &mut Transport,
    result: SecretResult<crate::secrets::Secret>,
) -> std::io::Result<()> {
    let response = match result {
        Ok(secret) => Response::Secret {
            secret: WireSecret::from(&secret),
        },
        Err(err) => Response::Error {
            error: WireError::from(&err),
        },
    };
    send(transport, &response).await
}

async fn send(transport: &mut Transport, response: &Response) -> std::io::Result<()> {
    let bytes = serde_json::to_vec(response)?;
    transport.send(bytes.into()).await
}
