//! Notification delivery worker

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::notify::channel::NotificationChannel;
use crate::notify::Notification;

/// Deliver notifications until shutdown or until every dispatcher is gone.
/// Whatever is already buffered at shutdown is still delivered.
pub async fn run<C>(
    mut rx: mpsc::Receiver<Notification>,
    channel: &C,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    C: NotificationChannel + ?Sized,
{
    info!("Notifier worker starting...");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Notifier worker shutting down...");
                break;
            }
            next = rx.recv() => match next {
                Some(notification) => deliver(channel, &notification).await,
                None => {
                    info!("All dispatchers dropped, notifier worker stopping...");
                    return;
                }
            }
        }
    }

    rx.close();
    while let Some(notification) = rx.recv().await {
        deliver(channel, &notification).await;
    }
}

async fn deliver<C: NotificationChannel + ?Sized>(channel: &C, notification: &Notification) {
    if let Err(e) = channel.deliver(notification).await {
        warn!(
            kind = %notification.kind,
            website_id = %notification.website_id,
            "Notification delivery failed: {}",
            e
        );
    }
}
