// SPDX-FileCopyrightText: Copyright (c) 2025-2026 Databus Project Contributors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The single-writer apply loop, made structural.
//!
//! The routing core is `!Send` by construction and assumes one logical writer
//! per tree. [`ThreadedRouter`] is the sanctioned way to drive a tree from
//! async or multi-threaded callers: the tree lives on one dedicated writer
//! thread, requests arrive over a channel, and every mutation serializes
//! there. Replies travel back over oneshot channels; shutdown cancels the
//! loop and joins the thread.

use std::sync::Mutex;
use std::thread::JoinHandle;

use async_trait::async_trait;
use flume::unbounded;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::config::RouterConfig;
use crate::keyspec::KeySpec;
use crate::protocols::{MemberHandle, RecordKind, RouterError, RoutingError};
use crate::tree::{ChunkSummary, Registration, RoutingTree, ShardDump};

enum RouterCommand {
    Register {
        reg: Registration,
        resp: oneshot::Sender<Result<ChunkSummary, RoutingError>>,
    },
    Deregister {
        reg: Registration,
        resp: oneshot::Sender<Result<(), RoutingError>>,
    },
    Promote {
        reg: Registration,
        resp: oneshot::Sender<Result<(), RoutingError>>,
    },
    PurgeMember {
        member: MemberHandle,
        resp: oneshot::Sender<usize>,
    },
    Lookup {
        keyspec: KeySpec,
        resp: oneshot::Sender<Option<ChunkSummary>>,
    },
    Dump {
        resp: oneshot::Sender<ShardDump>,
    },
}

/// Async front for a routing tree owned by a writer thread.
#[async_trait]
pub trait RoutingInterface {
    async fn register(&self, reg: Registration) -> Result<ChunkSummary, RouterError>;
    async fn deregister(&self, reg: Registration) -> Result<(), RouterError>;
    async fn promote(&self, reg: Registration) -> Result<(), RouterError>;
    async fn purge_member(&self, member: MemberHandle) -> Result<usize, RouterError>;
    async fn lookup(&self, keyspec: KeySpec) -> Result<Option<ChunkSummary>, RouterError>;
    async fn dump(&self) -> Result<ShardDump, RouterError>;

    /// Stop the writer loop and join its thread.
    fn shutdown(&self);
}

/// Owns a [`RoutingTree`] on a dedicated writer thread and serializes every
/// request onto it.
pub struct ThreadedRouter {
    commands: flume::Sender<RouterCommand>,
    cancel_token: CancellationToken,
    thread_handle: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadedRouter {
    pub fn new(config: RouterConfig, kind: RecordKind) -> Self {
        let (command_tx, command_rx) = unbounded::<RouterCommand>();
        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();

        let handle = std::thread::spawn(move || {
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to build writer runtime")
                .block_on(async move {
                    // The tree is constructed on the writer thread and never
                    // leaves it.
                    let tree = RoutingTree::with_config(config, kind);
                    loop {
                        tokio::select! {
                            biased;

                            _ = token.cancelled() => {
                                break;
                            }

                            Ok(command) = command_rx.recv_async() => {
                                Self::handle_command(&tree, command);
                            }
                        }
                    }
                });
        });

        Self {
            commands: command_tx,
            cancel_token,
            thread_handle: Mutex::new(Some(handle)),
        }
    }

    fn handle_command(tree: &RoutingTree, command: RouterCommand) {
        match command {
            RouterCommand::Register { reg, resp } => {
                let result = tree.register(&reg).map(|outcome| outcome.summary());
                let _ = resp.send(result);
            }
            RouterCommand::Deregister { reg, resp } => {
                let _ = resp.send(tree.deregister(&reg));
            }
            RouterCommand::Promote { reg, resp } => {
                let _ = resp.send(tree.promote(&reg));
            }
            RouterCommand::PurgeMember { member, resp } => {
                let _ = resp.send(tree.purge_member(member));
            }
            RouterCommand::Lookup { keyspec, resp } => {
                let _ = resp.send(tree.match_summary(&keyspec));
            }
            RouterCommand::Dump { resp } => {
                let _ = resp.send(tree.dump());
            }
        }
    }

    fn submit(&self, command: RouterCommand) -> Result<(), RouterError> {
        self.commands.send(command).map_err(|_| {
            tracing::error!("failed to send router command; the writer thread is gone");
            RouterError::ServiceOffline
        })
    }
}

#[async_trait]
impl RoutingInterface for ThreadedRouter {
    async fn register(&self, reg: Registration) -> Result<ChunkSummary, RouterError> {
        let (resp, resp_rx) = oneshot::channel();
        self.submit(RouterCommand::Register { reg, resp })?;
        resp_rx
            .await
            .map_err(|_| RouterError::DroppedRequest)?
            .map_err(RouterError::from)
    }

    async fn deregister(&self, reg: Registration) -> Result<(), RouterError> {
        let (resp, resp_rx) = oneshot::channel();
        self.submit(RouterCommand::Deregister { reg, resp })?;
        resp_rx
            .await
            .map_err(|_| RouterError::DroppedRequest)?
            .map_err(RouterError::from)
    }

    async fn promote(&self, reg: Registration) -> Result<(), RouterError> {
        let (resp, resp_rx) = oneshot::channel();
        self.submit(RouterCommand::Promote { reg, resp })?;
        resp_rx
            .await
            .map_err(|_| RouterError::DroppedRequest)?
            .map_err(RouterError::from)
    }

    async fn purge_member(&self, member: MemberHandle) -> Result<usize, RouterError> {
        let (resp, resp_rx) = oneshot::channel();
        self.submit(RouterCommand::PurgeMember { member, resp })?;
        resp_rx.await.map_err(|_| RouterError::DroppedRequest)
    }

    async fn lookup(&self, keyspec: KeySpec) -> Result<Option<ChunkSummary>, RouterError> {
        let (resp, resp_rx) = oneshot::channel();
        self.submit(RouterCommand::Lookup { keyspec, resp })?;
        resp_rx.await.map_err(|_| RouterError::DroppedRequest)
    }

    async fn dump(&self) -> Result<ShardDump, RouterError> {
        let (resp, resp_rx) = oneshot::channel();
        self.submit(RouterCommand::Dump { resp })?;
        resp_rx.await.map_err(|_| RouterError::DroppedRequest)
    }

    fn shutdown(&self) {
        self.cancel_token.cancel();
        let handle = self
            .thread_handle
            .lock()
            .expect("thread_handle mutex poisoned")
            .take();
        if let Some(handle) = handle
            && let Err(e) = handle.join()
        {
            tracing::error!("writer thread panicked during shutdown: {:?}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyspec::{KeyValue, PathElement};
    use crate::protocols::{FlavorParams, RecordFlags};

    fn svc_keyspec(id: u32) -> KeySpec {
        KeySpec::new().with_element(PathElement::new(1, 10).with_key(KeyValue::from_u32(id)))
    }

    fn subscriber(member: u64, id: u32, path: &str) -> Registration {
        Registration::new(member, svc_keyspec(id), RecordFlags::subscriber(), path)
            .with_params(FlavorParams::Ident)
    }

    #[tokio::test]
    async fn test_register_lookup_deregister_round_trip() {
        let router = ThreadedRouter::new(RouterConfig::default(), RecordKind::Member);

        let summary = router.register(subscriber(1, 7, "path/A")).await.unwrap();
        assert_eq!(summary.subscribers, 1);
        assert_eq!(summary.publishers, 0);

        let found = router.lookup(svc_keyspec(7)).await.unwrap();
        assert_eq!(found, Some(summary));
        assert_eq!(router.lookup(svc_keyspec(8)).await.unwrap(), None);

        router.deregister(subscriber(1, 7, "path/A")).await.unwrap();
        assert_eq!(router.lookup(svc_keyspec(7)).await.unwrap(), None);

        router.shutdown();
    }

    #[tokio::test]
    async fn test_deregister_error_crosses_channel() {
        let router = ThreadedRouter::new(RouterConfig::default(), RecordKind::Member);

        let err = router
            .deregister(subscriber(1, 7, "path/A"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RouterError::Routing(RoutingError::NoMatch)
        ));

        router.shutdown();
    }

    #[tokio::test]
    async fn test_promote_and_purge() {
        let router = ThreadedRouter::new(RouterConfig::default(), RecordKind::Member);

        router.register(subscriber(1, 7, "path/A")).await.unwrap();
        router.promote(subscriber(1, 7, "path/A")).await.unwrap();

        let summary = router.lookup(svc_keyspec(7)).await.unwrap().unwrap();
        assert_eq!(summary.publishers, 1);
        assert_eq!(summary.subscribers, 0);

        assert_eq!(router.purge_member(1).await.unwrap(), 1);
        assert_eq!(router.lookup(svc_keyspec(7)).await.unwrap(), None);

        router.shutdown();
    }

    #[tokio::test]
    async fn test_dump_over_channel() {
        let router = ThreadedRouter::new(RouterConfig::default(), RecordKind::Member);
        router.register(subscriber(1, 7, "path/A")).await.unwrap();

        let dump = router.dump().await.unwrap();
        assert_eq!(dump.children.len(), 1);

        router.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_requests() {
        let router = ThreadedRouter::new(RouterConfig::default(), RecordKind::Member);
        router.shutdown();

        // The loop is gone; the command either fails to send or is dropped
        let err = router.register(subscriber(1, 7, "path/A")).await.unwrap_err();
        assert!(matches!(
            err,
            RouterError::ServiceOffline | RouterError::DroppedRequest
        ));
    }
}
