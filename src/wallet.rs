//! Pledging wallet core: tracks pledged stubs, constructs pledges, revokes
//! them, and detects when a pledge has been claimed by the assembled
//! contract.
//!
//! The wallet core never touches key derivation, chain sync, or broadcast
//! directly; it is expressed against narrow ports the consumer implements,
//! the same way the host crate's channel state machine is expressed against
//! `NewAddress`/`BroadcastSignedTransaction`/`SignFundingPSBT`.

use crate::pledge::{PledgeMessage, UtxoOracle};
use crate::project::{ProjectDescriptor, ProjectId};
use crate::signature::{sign_p2pkh, SighashPolicy};
use crate::transaction::TransactionBuilder;
use bitcoin::hashes::{sha256d, Hash};
use bitcoin::secp256k1::{PublicKey, SecretKey};
use bitcoin::{Address, Amount, OutPoint, Transaction, TxOut};
use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Broadcasts a fully signed transaction to the network. Completion implies
/// P2P relay acceptance, not confirmation.
#[async_trait::async_trait]
pub trait Broadcaster {
    async fn broadcast(&self, transaction: Transaction) -> anyhow::Result<()>;
}

/// Wall-clock source, kept behind a port so wallet logic stays testable
/// without a real clock.
pub trait Clock: Send + Sync {
    fn now_unix(&self) -> i64;
}

/// Derives and looks up the wallet's own keys. Decryption of an
/// encrypted key is modeled as a separate step so a locked wallet can still
/// answer read-only queries.
#[async_trait::async_trait]
pub trait KeyProvider {
    async fn fresh_receive_address(&self) -> anyhow::Result<Address>;
    async fn fresh_auth_key(&self) -> anyhow::Result<PublicKey>;
    async fn find_key_by_pubkey(&self, pubkey: &PublicKey) -> anyhow::Result<Option<SecretKey>>;
}

/// Source of the wallet's own spendable outputs, consulted by coin
/// selection. Kept separate from [`KeyProvider`] because listing outputs is
/// a chain-state query, not a key-management one.
#[async_trait::async_trait]
pub trait SpendableOutputs {
    async fn spendable_outputs(&self) -> anyhow::Result<Vec<(OutPoint, TxOut)>>;
}

/// Durably persists a pledge record. Called before listeners are dispatched
/// so a crash between persistence and notification never leaves a committed
/// or revoked pledge unrecorded. Mirrors [`Broadcaster`]'s single-method
/// shape; storage format and medium are entirely the consumer's concern.
#[async_trait::async_trait]
pub trait Persistence {
    async fn persist(&self, record: PledgeRecord) -> anyhow::Result<()>;
}

/// Runs a listener callback outside the wallet's lock. Mirrors the host's
/// `SendMessage`/`ReceiveMessage` ports in keeping the runtime choice out of
/// the core.
pub trait Executor: Send + Sync {
    fn spawn(&self, future: Pin<Box<dyn Future<Output = ()> + Send>>);
}

/// A `tokio`-backed [`Executor`], the default for consumers that already
/// depend on `tokio` the way the host does for its own async tests.
pub struct TokioExecutor;

impl Executor for TokioExecutor {
    fn spawn(&self, future: Pin<Box<dyn Future<Output = ()> + Send>>) {
        tokio::task::spawn(future);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("insufficient spendable funds to cover the requested pledge")]
    InsufficientFunds,
    #[error("precondition violated: {reason}")]
    PreconditionViolated { reason: String },
    #[error("{0}")]
    Port(#[from] anyhow::Error),
}

/// Stable identity of a pledge: the double-SHA256 of its pledge
/// transaction's canonical serialization, reusing the crate's one hash
/// primitive rather than inventing a second.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PledgeHash(pub sha256d::Hash);

fn pledge_hash(pledge: &PledgeMessage) -> PledgeHash {
    let transaction = pledge.transactions.last().expect("pledge has at least one transaction");
    PledgeHash(sha256d::Hash::hash(&crate::transaction::canonical_serialize(transaction)))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PledgeStatus {
    Pending,
    Committed,
    Revoked,
    Claimed,
}

#[derive(Clone, Debug)]
pub struct PledgeRecord {
    pub message: PledgeMessage,
    pub project_id: ProjectId,
    pub stub: OutPoint,
    pub status: PledgeStatus,
}

/// A pledge that has been built but not yet committed to wallet state.
/// `commit` must be called (and succeed) before the wallet considers the
/// stub spent for coin-selection purposes.
#[derive(Clone, Debug)]
pub struct PendingPledge {
    pub dependency: Option<Transaction>,
    pub pledge: PledgeMessage,
    pub fees_paid: Amount,
    stub: OutPoint,
    project_id: ProjectId,
}

#[derive(Default)]
struct WalletState {
    /// Single authoritative index, keyed by pledge hash.
    records: HashMap<PledgeHash, PledgeRecord>,
    /// Secondary lookup: stub outpoint -> pledge hash, for non-revoked
    /// pledges only.
    by_stub: HashMap<OutPoint, PledgeHash>,
    /// Secondary lookup: project -> pledge hash, for non-revoked pledges.
    by_project: HashMap<ProjectId, PledgeHash>,
    /// Revocation transactions that have been broadcast but whose
    /// confirmation has not yet been observed; consulted by claim detection
    /// to distinguish "we did this" from "someone else spent our stub".
    revoke_in_progress: HashSet<OutPoint>,
}

/// Tracks pledged stubs, builds and commits new pledges, revokes them, and
/// observes the chain for claims. Guarded by a single reentrant mutex so
/// listener callbacks invoked from inside a wallet method can re-enter
/// safely.
pub struct PledgingWallet<O, B, C, K, S, P> {
    oracle: O,
    broadcaster: B,
    clock: C,
    keys: K,
    spendable: S,
    persistence: P,
    config: crate::config::Config,
    state: ReentrantMutex<RefCell<WalletState>>,
    on_pledge: ReentrantMutex<RefCell<Vec<(Arc<dyn Executor>, Arc<dyn Fn(PledgeRecord) + Send + Sync>)>>>,
    on_revoke: ReentrantMutex<RefCell<Vec<(Arc<dyn Executor>, Arc<dyn Fn(PledgeRecord) + Send + Sync>)>>>,
    on_claim: ReentrantMutex<RefCell<Vec<(Arc<dyn Executor>, Arc<dyn Fn(PledgeRecord) + Send + Sync>)>>>,
}

impl<O, B, C, K, S, P> PledgingWallet<O, B, C, K, S, P>
where
    O: UtxoOracle,
    B: Broadcaster,
    C: Clock,
    K: KeyProvider,
    S: SpendableOutputs,
    P: Persistence,
{
    pub fn new(
        oracle: O,
        broadcaster: B,
        clock: C,
        keys: K,
        spendable: S,
        persistence: P,
        config: crate::config::Config,
    ) -> Self {
        Self {
            oracle,
            broadcaster,
            clock,
            keys,
            spendable,
            persistence,
            config,
            state: ReentrantMutex::new(RefCell::new(WalletState::default())),
            on_pledge: ReentrantMutex::new(RefCell::new(Vec::new())),
            on_revoke: ReentrantMutex::new(RefCell::new(Vec::new())),
            on_claim: ReentrantMutex::new(RefCell::new(Vec::new())),
        }
    }

    pub fn on_pledge(&self, executor: Arc<dyn Executor>, handler: impl Fn(PledgeRecord) + Send + Sync + 'static) {
        self.on_pledge.lock().borrow_mut().push((executor, Arc::new(handler)));
    }

    pub fn on_revoke(&self, executor: Arc<dyn Executor>, handler: impl Fn(PledgeRecord) + Send + Sync + 'static) {
        self.on_revoke.lock().borrow_mut().push((executor, Arc::new(handler)));
    }

    pub fn on_claim(&self, executor: Arc<dyn Executor>, handler: impl Fn(PledgeRecord) + Send + Sync + 'static) {
        self.on_claim.lock().borrow_mut().push((executor, Arc::new(handler)));
    }

    /// Outpoints of stubs already pledged (and not revoked), excluded from
    /// coin selection.
    fn pledged_stubs(&self) -> HashSet<OutPoint> {
        self.state.lock().borrow().by_stub.keys().copied().collect()
    }

    /// Build, but do not commit, a pledge of exactly `value` toward
    /// `project`. Prefers an existing output of exactly `value`; otherwise
    /// synthesizes a dependency transaction producing one.
    #[tracing::instrument(skip(self, project))]
    pub async fn create_pledge(&self, project: &ProjectDescriptor, value: Amount) -> Result<PendingPledge, WalletError> {
        let excluded = self.pledged_stubs();
        let candidates = self.spendable.spendable_outputs().await?;
        let available: Vec<_> = candidates.into_iter().filter(|(outpoint, _)| !excluded.contains(outpoint)).collect();

        let exact_match_index = available.iter().position(|(_, output)| output.value == value.as_sat());

        let (stub_outpoint, stub_output, dependency, fees_paid) = if let Some(index) = exact_match_index {
            let (outpoint, output) = &available[index];
            (*outpoint, output.clone(), None, Amount::from_sat(0))
        } else {
            let total_available: u64 = available.iter().map(|(_, o)| o.value).sum();
            let fee = self.config.tx_fee;
            if total_available < value.as_sat() + fee.as_sat() {
                return Err(WalletError::InsufficientFunds);
            }

            let funding_source = available.into_iter().next().ok_or(WalletError::InsufficientFunds)?;
            let (source_outpoint, source_output) = funding_source;
            let secret_key = self
                .keys
                .find_key_by_pubkey(&pubkey_for_script(&source_output.script_pubkey))
                .await?
                .ok_or_else(|| WalletError::PreconditionViolated {
                    reason: "no key for spendable output's script".to_string(),
                })?;

            let self_address = self.keys.fresh_receive_address().await?;
            let change = source_output.value - value.as_sat() - fee.as_sat();

            let mut builder = TransactionBuilder::new()
                .add_input(source_outpoint, source_output.clone())
                .add_output(value, self_address.script_pubkey());
            if change > 0 {
                builder = builder.add_output(Amount::from_sat(change), source_output.script_pubkey.clone());
            }
            let mut dependency_tx = builder.build();

            let script_sig = sign_p2pkh(
                &dependency_tx,
                0,
                &source_output.script_pubkey,
                &secret_key,
                SighashPolicy::All,
            );
            dependency_tx.input[0].script_sig = script_sig;

            let stub_outpoint = OutPoint::new(dependency_tx.txid(), 0);
            let stub_output = dependency_tx.output[0].clone();

            (stub_outpoint, stub_output, Some(dependency_tx), fee)
        };

        let pledge_secret_key = self
            .keys
            .find_key_by_pubkey(&pubkey_for_script(&stub_output.script_pubkey))
            .await?
            .ok_or_else(|| WalletError::PreconditionViolated {
                reason: "no key for stub output's script".to_string(),
            })?;

        let mut pledge_tx = TransactionBuilder::new()
            .add_input(stub_outpoint, stub_output.clone())
            .build();
        pledge_tx.output = project
            .outputs
            .iter()
            .map(|required| TxOut {
                value: required.amount.as_sat(),
                script_pubkey: required.script_pubkey.clone(),
            })
            .collect();

        let script_sig = sign_p2pkh(
            &pledge_tx,
            0,
            &stub_output.script_pubkey,
            &pledge_secret_key,
            SighashPolicy::AllAppendPermitted,
        );
        pledge_tx.input[0].script_sig = script_sig;

        let pledge = PledgeMessage {
            transactions: vec![pledge_tx],
            total_input_value: stub_output.value,
            timestamp: self.clock.now_unix(),
            project_id: project.project_id().to_string(),
            contact: None,
        };

        Ok(PendingPledge {
            dependency,
            pledge,
            fees_paid,
            stub: stub_outpoint,
            project_id: project.project_id(),
        })
    }

    /// Commit a previously built pledge, marking its stub as pledged and
    /// optionally broadcasting its dependency transaction. Idempotent calls
    /// fail with [`WalletError::PreconditionViolated`].
    #[tracing::instrument(skip(self, pending))]
    pub async fn commit(&self, pending: PendingPledge, broadcast_dep: bool) -> Result<(), WalletError> {
        if broadcast_dep {
            if let Some(dependency) = pending.dependency.clone() {
                self.broadcaster.broadcast(dependency).await?;
            }
        }

        let hash = pledge_hash(&pending.pledge);
        let record = {
            let guard = self.state.lock();
            let mut state = guard.borrow_mut();

            if state.records.contains_key(&hash) {
                return Err(WalletError::PreconditionViolated {
                    reason: "pledge already committed".to_string(),
                });
            }
            if state.by_stub.contains_key(&pending.stub) {
                return Err(WalletError::PreconditionViolated {
                    reason: "stub already pledged".to_string(),
                });
            }
            if state.by_project.contains_key(&pending.project_id) {
                return Err(WalletError::PreconditionViolated {
                    reason: "project already has a pledge".to_string(),
                });
            }

            let record = PledgeRecord {
                message: pending.pledge,
                project_id: pending.project_id,
                stub: pending.stub,
                status: PledgeStatus::Committed,
            };

            state.by_stub.insert(pending.stub, hash);
            state.by_project.insert(pending.project_id, hash);
            state.records.insert(hash, record.clone());
            record
        };

        tracing::debug!(stub = ?pending.stub, "pledge committed");
        self.persistence.persist(record.clone()).await?;
        self.dispatch(&self.on_pledge, record);
        Ok(())
    }

    /// Double-spend our own stub back to ourselves, invalidating the
    /// committed pledge. On broadcast failure the wallet state is left
    /// untouched (the pledge remains committed and retryable).
    #[tracing::instrument(skip(self))]
    pub async fn revoke_pledge(&self, hash: PledgeHash) -> Result<(), WalletError> {
        let (stub, stub_output) = {
            let guard = self.state.lock();
            let state = guard.borrow();
            let record = state.records.get(&hash).ok_or_else(|| WalletError::PreconditionViolated {
                reason: "unknown pledge".to_string(),
            })?;
            if record.status != PledgeStatus::Committed {
                return Err(WalletError::PreconditionViolated {
                    reason: "pledge is not in committed state".to_string(),
                });
            }
            let pledge_tx = record.message.transactions.last().expect("has transaction");
            (record.stub, pledge_tx.input[0].clone())
        };

        let resolved = self.oracle.resolve(&[stub]).await;
        let prevout = resolved
            .into_iter()
            .next()
            .flatten()
            .ok_or_else(|| WalletError::PreconditionViolated {
                reason: "stub no longer resolvable".to_string(),
            })?;

        let self_address = self.keys.fresh_receive_address().await?;
        let secret_key = self
            .keys
            .find_key_by_pubkey(&pubkey_for_script(&prevout.script_pubkey))
            .await?
            .ok_or_else(|| WalletError::PreconditionViolated {
                reason: "no key for stub output's script".to_string(),
            })?;

        let fee = self.config.tx_fee;
        let payout = Amount::from_sat(prevout.value.saturating_sub(fee.as_sat()));

        let mut revocation_tx = TransactionBuilder::new()
            .add_input(stub, prevout.clone())
            .add_output(payout, self_address.script_pubkey())
            .build();
        let script_sig = sign_p2pkh(&revocation_tx, 0, &prevout.script_pubkey, &secret_key, SighashPolicy::All);
        revocation_tx.input[0].script_sig = script_sig;

        {
            self.state.lock().borrow_mut().revoke_in_progress.insert(stub);
        }

        let broadcast_result = self.broadcaster.broadcast(revocation_tx).await;

        match broadcast_result {
            Ok(()) => {
                let record = {
                    let guard = self.state.lock();
                    let mut state = guard.borrow_mut();
                    state.revoke_in_progress.remove(&stub);
                    state.by_stub.remove(&stub);
                    state.by_project.retain(|_, v| *v != hash);
                    let mut record = state.records.get(&hash).expect("checked above").clone();
                    record.status = PledgeStatus::Revoked;
                    state.records.insert(hash, record.clone());
                    record
                };
                tracing::debug!(stub = ?stub, "pledge revoked");
                self.persistence.persist(record.clone()).await?;
                self.dispatch(&self.on_revoke, record);
                Ok(())
            }
            Err(error) => {
                self.state.lock().borrow_mut().revoke_in_progress.remove(&stub);
                tracing::warn!(stub = ?stub, error = %error, "revocation broadcast failed, leaving pledge committed");
                Err(WalletError::Port(error))
            }
        }
    }

    /// Feed an observed transaction that spends one of our stubs. If the
    /// spend was not self-initiated and its outputs match the project's
    /// required outputs, fires `on_claim`; otherwise logs and leaves state
    /// untouched.
    pub fn observe_spend(&self, spending_transaction: &Transaction, spent_outpoint: OutPoint, project: &ProjectDescriptor) {
        let self_initiated = self.state.lock().borrow().revoke_in_progress.contains(&spent_outpoint);
        if self_initiated {
            return;
        }

        let hash = match self.state.lock().borrow().by_stub.get(&spent_outpoint).copied() {
            Some(hash) => hash,
            None => return,
        };

        if !project.outputs_match(&spending_transaction.output) {
            tracing::warn!(outpoint = ?spent_outpoint, "unrecognized spend of our stub");
            return;
        }

        let record = {
            let guard = self.state.lock();
            let mut state = guard.borrow_mut();
            let mut record = match state.records.get(&hash) {
                Some(record) => record.clone(),
                None => return,
            };
            record.status = PledgeStatus::Claimed;
            state.records.insert(hash, record.clone());
            state.by_stub.remove(&spent_outpoint);
            record
        };

        tracing::debug!(outpoint = ?spent_outpoint, "pledge claimed");
        self.dispatch(&self.on_claim, record);
    }

    fn dispatch(
        &self,
        listeners: &ReentrantMutex<RefCell<Vec<(Arc<dyn Executor>, Arc<dyn Fn(PledgeRecord) + Send + Sync>)>>>,
        record: PledgeRecord,
    ) {
        let handlers: Vec<_> = listeners.lock().borrow().iter().cloned().collect();
        for (executor, handler) in handlers {
            let record = record.clone();
            executor.spawn(Box::pin(async move { handler(record) }));
        }
    }
}

/// Placeholder key-recovery hook: real wallets index keys by the script they
/// fund, not recover a pubkey from one. Retained as the seam
/// [`KeyProvider::find_key_by_pubkey`] is called through; concrete
/// implementations look up by output script directly.
fn pubkey_for_script(script: &bitcoin::Script) -> PublicKey {
    use bitcoin::blockdata::script::Instruction;
    for instruction in script.instructions() {
        if let Ok(Instruction::PushBytes(bytes)) = instruction {
            if let Ok(key) = PublicKey::from_slice(bytes) {
                return key;
            }
        }
    }
    // p2pkh scripts carry a hash, not a pubkey; callers must resolve via
    // their own address book. This crate's tests only exercise p2pk-style
    // stubs for this reason.
    panic!("script does not embed a recoverable pubkey")
}
