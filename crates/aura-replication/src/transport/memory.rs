//! In-process group transport.
//!
//! Every channel has one ordered inbox drained by a single delivery task, so
//! calls and views from one sender arrive in send order. Calls and replies
//! go through the wire codec exactly as they would over a network.

use super::{
    ChannelFactory, Destination, GroupChannel, GroupReceiver, MemberResponse, NodeAddress, Reply,
    RequestOptions, ResponseMode, TransportError, View,
};
use crate::wire::{decode_reply, encode_call, encode_reply, MethodCall};
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

enum Delivery {
    Call {
        sender: NodeAddress,
        payload: Vec<u8>,
        reply: Option<oneshot::Sender<Vec<u8>>>,
    },
    View {
        view: View,
        installed: Option<oneshot::Sender<()>>,
    },
}

#[derive(Clone)]
struct Member {
    address: NodeAddress,
    inbox: mpsc::UnboundedSender<Delivery>,
}

/// Shared hub connecting in-memory channels, one member list per cluster.
#[derive(Clone, Default)]
pub struct MemoryGroup {
    clusters: Arc<Mutex<HashMap<String, Vec<Member>>>>,
}

impl MemoryGroup {
    /// Empty hub
    pub fn new() -> Self {
        Self::default()
    }

    /// Current members of `cluster` in join order
    pub fn members(&self, cluster: &str) -> Vec<NodeAddress> {
        self.clusters
            .lock()
            .get(cluster)
            .map(|members| members.iter().map(|m| m.address).collect())
            .unwrap_or_default()
    }

    fn inbox(
        &self,
        cluster: &str,
        address: NodeAddress,
    ) -> Option<mpsc::UnboundedSender<Delivery>> {
        self.clusters
            .lock()
            .get(cluster)?
            .iter()
            .find(|m| m.address == address)
            .map(|m| m.inbox.clone())
    }

    fn join(&self, cluster: &str, member: Member) -> Result<oneshot::Receiver<()>, TransportError> {
        let mut clusters = self.clusters.lock();
        let members = clusters.entry(cluster.to_string()).or_default();
        if members.iter().any(|m| m.address == member.address) {
            return Err(TransportError::ConnectionFailed {
                reason: format!("{} already joined {}", member.address, cluster),
            });
        }
        let joiner = member.address;
        members.push(member);

        let (installed_tx, installed_rx) = oneshot::channel();
        let mut installed_tx = Some(installed_tx);
        let view = View::new(members.iter().map(|m| m.address).collect());
        for m in members.iter() {
            let installed = if m.address == joiner {
                installed_tx.take()
            } else {
                None
            };
            let _ = m.inbox.send(Delivery::View {
                view: view.clone(),
                installed,
            });
        }
        Ok(installed_rx)
    }

    fn leave(&self, cluster: &str, address: NodeAddress) {
        let mut clusters = self.clusters.lock();
        let Some(members) = clusters.get_mut(cluster) else {
            return;
        };
        let before = members.len();
        members.retain(|m| m.address != address);
        if members.len() == before {
            return;
        }
        let view = View::new(members.iter().map(|m| m.address).collect());
        for m in members.iter() {
            let _ = m.inbox.send(Delivery::View {
                view: view.clone(),
                installed: None,
            });
        }
        if members.is_empty() {
            clusters.remove(cluster);
        }
    }
}

impl ChannelFactory for MemoryGroup {
    fn create_channel(&self, _cluster: &str) -> Result<Arc<dyn GroupChannel>, TransportError> {
        Ok(Arc::new(MemoryChannel {
            address: NodeAddress::random(),
            group: self.clone(),
            cluster: Mutex::new(None),
        }))
    }
}

/// One member's channel into a [`MemoryGroup`].
pub struct MemoryChannel {
    address: NodeAddress,
    group: MemoryGroup,
    cluster: Mutex<Option<String>>,
}

impl MemoryChannel {
    fn cluster(&self) -> Result<String, TransportError> {
        self.cluster.lock().clone().ok_or(TransportError::NotConnected)
    }

    fn deliver(
        &self,
        inbox: &mpsc::UnboundedSender<Delivery>,
        payload: Vec<u8>,
        reply: Option<oneshot::Sender<Vec<u8>>>,
    ) -> bool {
        inbox
            .send(Delivery::Call {
                sender: self.address,
                payload,
                reply,
            })
            .is_ok()
    }
}

async fn await_reply(rx: oneshot::Receiver<Vec<u8>>, timeout: Duration) -> Option<Reply> {
    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(bytes)) => match decode_reply(&bytes) {
            Ok(reply) => Some(reply),
            Err(error) => {
                tracing::warn!(error = %error, "dropping undecodable reply");
                None
            }
        },
        _ => None,
    }
}

async fn run_delivery(
    address: NodeAddress,
    receiver: Arc<dyn GroupReceiver>,
    mut inbox: mpsc::UnboundedReceiver<Delivery>,
) {
    while let Some(delivery) = inbox.recv().await {
        match delivery {
            Delivery::Call {
                sender,
                payload,
                reply,
            } => {
                let answer = receiver.receive(sender, &payload).await;
                let Some(reply) = reply else {
                    continue;
                };
                match encode_reply(&answer) {
                    Ok(bytes) => {
                        let _ = reply.send(bytes);
                    }
                    Err(error) => {
                        tracing::error!(local = %address, peer = %sender, error = %error, "failed to encode reply")
                    }
                }
            }
            Delivery::View { view, installed } => {
                receiver.view_accepted(view).await;
                if let Some(installed) = installed {
                    let _ = installed.send(());
                }
            }
        }
    }
    tracing::trace!(local = %address, "delivery task finished");
}

#[async_trait]
impl GroupChannel for MemoryChannel {
    fn address(&self) -> NodeAddress {
        self.address
    }

    async fn connect(
        &self,
        cluster: &str,
        receiver: Arc<dyn GroupReceiver>,
    ) -> Result<(), TransportError> {
        if self.cluster.lock().is_some() {
            return Err(TransportError::ConnectionFailed {
                reason: format!("{} is already connected", self.address),
            });
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let installed = self.group.join(
            cluster,
            Member {
                address: self.address,
                inbox: tx,
            },
        )?;
        *self.cluster.lock() = Some(cluster.to_string());
        tokio::spawn(run_delivery(self.address, receiver, rx));

        installed.await.map_err(|_| TransportError::ConnectionFailed {
            reason: "first view was not installed".to_string(),
        })?;
        tracing::debug!(local = %self.address, cluster, "channel connected");
        Ok(())
    }

    async fn call_remote_methods(
        &self,
        dest: Destination,
        call: &MethodCall,
        options: RequestOptions,
    ) -> Result<Vec<MemberResponse>, TransportError> {
        let cluster = self.cluster()?;
        let payload = encode_call(call)?;
        let targets = match dest {
            Destination::All => self.group.members(&cluster),
            Destination::Members(members) => members,
        };

        if options.mode == ResponseMode::GetNone {
            for target in targets {
                let delivered = self
                    .group
                    .inbox(&cluster, target)
                    .is_some_and(|inbox| self.deliver(&inbox, payload.clone(), None));
                if !delivered {
                    tracing::trace!(local = %self.address, peer = %target, "dropped one-way call");
                }
            }
            return Ok(Vec::new());
        }

        let pending = targets.into_iter().map(|target| {
            let inbox = self.group.inbox(&cluster, target);
            let (tx, rx) = oneshot::channel();
            let delivered =
                inbox.is_some_and(|inbox| self.deliver(&inbox, payload.clone(), Some(tx)));
            async move {
                let reply = if delivered {
                    await_reply(rx, options.timeout).await
                } else {
                    None
                };
                MemberResponse {
                    sender: target,
                    reply,
                }
            }
        });
        Ok(join_all(pending).await)
    }

    async fn call_remote_method(
        &self,
        dest: NodeAddress,
        call: &MethodCall,
        options: RequestOptions,
    ) -> Result<Option<Reply>, TransportError> {
        let cluster = self.cluster()?;
        let payload = encode_call(call)?;
        let inbox = self
            .group
            .inbox(&cluster, dest)
            .ok_or(TransportError::UnknownMember { address: dest })?;

        if options.mode == ResponseMode::GetNone {
            self.deliver(&inbox, payload, None);
            return Ok(None);
        }

        let (tx, rx) = oneshot::channel();
        if !self.deliver(&inbox, payload, Some(tx)) {
            return Err(TransportError::UnknownMember { address: dest });
        }
        match await_reply(rx, options.timeout).await {
            Some(reply) => Ok(Some(reply)),
            None => Err(TransportError::Timeout {
                operation: format!("call {} on {}", call.id, dest),
                timeout_ms: options.timeout.as_millis() as u64,
            }),
        }
    }

    async fn close(&self) {
        let Some(cluster) = self.cluster.lock().take() else {
            return;
        };
        self.group.leave(&cluster, self.address);
        tracing::debug!(local = %self.address, cluster = %cluster, "channel closed");
    }
}
