use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context as _, Result};
use dns_types::{Query, ResponseBuilder};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use v2router::{BufferedWriter, Handler as _, Router};

/// Serves UDP DNS queries until `ctx` is cancelled.
///
/// Every query runs in its own task; handler failures are answered with the
/// response code the error maps to.
pub async fn serve(listen: SocketAddr, router: Arc<Router>, ctx: CancellationToken) -> Result<()> {
    let socket = Arc::new(
        UdpSocket::bind(listen)
            .await
            .with_context(|| format!("Failed to bind {listen}"))?,
    );

    tracing::info!(%listen, "Listening for UDP DNS queries");

    // On the public Internet, any MTU > 1500 is very unlikely so 2000 is a safe bet.
    let mut buffer = vec![0u8; 2000];

    loop {
        let (len, from) = tokio::select! {
            () = ctx.cancelled() => return Ok(()),
            received = socket.recv_from(&mut buffer) => {
                received.context("Failed to receive UDP packet")?
            }
        };

        let query = match Query::parse(&buffer[..len]) {
            Ok(query) => query,
            Err(error) => {
                tracing::debug!(%from, %error, "Ignoring malformed datagram");
                continue;
            }
        };

        tokio::spawn(handle(
            router.clone(),
            socket.clone(),
            ctx.clone(),
            query,
            from,
        ));
    }
}

async fn handle(
    router: Arc<Router>,
    socket: Arc<UdpSocket>,
    ctx: CancellationToken,
    query: Query,
    from: SocketAddr,
) {
    let mut writer = BufferedWriter::new();

    let response = match router.serve_dns(&ctx, &mut writer, &query).await {
        Ok(_) => writer.into_response(),
        Err(error) => {
            tracing::warn!(%error, "Query failed");

            Some(ResponseBuilder::for_query(&query, error.rcode()).build())
        }
    };

    let Some(response) = response else {
        return;
    };

    if let Err(error) = socket.send_to(response.as_bytes(), from).await {
        tracing::debug!(%from, %error, "Failed to send response");
    }
}
