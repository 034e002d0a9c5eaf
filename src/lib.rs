pub mod action;
pub mod apply;
pub mod cell;
pub mod censor;
pub mod config;
pub mod error;
pub mod eval;
pub mod lattice;
mod planner;
pub mod provider;
pub mod rules;
pub mod session;
pub mod snapshot;
pub mod table;
pub mod user;

use crate::action::{ActionGroup, DocAction, UserAction, is_reserved_table};
use crate::censor::censor_meta_tables;
use crate::config::RowgateConfig;
use crate::error::RowgateError;
use crate::eval::PermissionInfo;
use crate::lattice::TableRead;
use crate::provider::{DocData, RuleCompiler, StoreFetcher};
use crate::rules::RuleStore;
use crate::rules::load::{load_characteristic_tables, load_rules};
use crate::session::{Session, SessionId};
use crate::snapshot::{Broadcast, RowSnapshotBundle};
use crate::table::{TableData, TableQuery};
use crate::user::{CharacteristicTable, UserAttributeRule, UserInfo, enrich_user};
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::info;

struct EngineState {
    rules: Arc<RuleStore>,
    attr_rules: Arc<Vec<UserAttributeRule>>,
    char_tables: Arc<BTreeMap<String, CharacteristicTable>>,
    /// Explicit side-table standing in for a weak per-session association:
    /// bounded, evicted on `end_session`, cleared wholesale on rule reload.
    sessions: LruCache<SessionId, Arc<PermissionInfo>>,
}

/// The access engine of one open document.
///
/// Sits between the document's authoritative mutation stream and every
/// external consumer: gates incoming user actions, rewrites outgoing
/// mutation broadcasts per recipient, and censors document metadata.
pub struct AccessEngine {
    doc: Arc<dyn DocData>,
    fetcher: Arc<dyn StoreFetcher>,
    compiler: Arc<dyn RuleCompiler>,
    config: RowgateConfig,
    state: RwLock<EngineState>,
    broadcast: Mutex<Option<Broadcast>>,
}

impl AccessEngine {
    pub fn new(
        doc: Arc<dyn DocData>,
        fetcher: Arc<dyn StoreFetcher>,
        compiler: Arc<dyn RuleCompiler>,
        config: RowgateConfig,
    ) -> Self {
        let capacity =
            NonZeroUsize::new(config.session_cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            doc,
            fetcher,
            compiler,
            config,
            state: RwLock::new(EngineState {
                rules: Arc::new(RuleStore::empty()),
                attr_rules: Arc::new(Vec::new()),
                char_tables: Arc::new(BTreeMap::new()),
                sessions: LruCache::new(capacity),
            }),
            broadcast: Mutex::new(None),
        }
    }

    /// Rebuilds the rule store and characteristic tables from the document's
    /// current rule metadata. The new state is constructed completely before
    /// the swap, so concurrent evaluations observe either the old or the new
    /// rules, never a mixture. On error the old state stays in force.
    pub async fn update(&self) -> Result<(), RowgateError> {
        let loaded = load_rules(self.doc.as_ref(), self.compiler.as_ref(), &self.config)?;
        let char_tables =
            load_characteristic_tables(self.fetcher.as_ref(), &loaded.attr_rules).await?;
        let mut state = self.state.write();
        state.rules = Arc::new(loaded.store);
        state.attr_rules = Arc::new(loaded.attr_rules);
        state.char_tables = Arc::new(char_tables);
        state.sessions.clear();
        info!(
            ruled_tables = state.rules.all_table_ids().len(),
            attribute_tables = state.char_tables.len(),
            have_rules = state.rules.have_rules(),
            "access rules reloaded"
        );
        Ok(())
    }

    /// Drops the cached evaluator for a closed session.
    pub fn end_session(&self, session_id: SessionId) {
        self.state.write().sessions.pop(&session_id);
    }

    fn have_rules(&self) -> bool {
        self.state.read().rules.have_rules()
    }

    /// The cached per-session evaluator, building (and enriching the user
    /// record) on first use.
    pub fn permission_info(&self, session: &Session) -> Arc<PermissionInfo> {
        let mut state = self.state.write();
        if let Some(hit) = state.sessions.get(&session.id) {
            return Arc::clone(hit);
        }
        let mut user = UserInfo::from_session(session);
        enrich_user(&mut user, &state.attr_rules, &state.char_tables);
        let info = Arc::new(PermissionInfo::new(
            Arc::clone(&state.rules),
            user,
            self.config.log_rule_errors,
        ));
        state.sessions.put(session.id, Arc::clone(&info));
        info
    }

    pub fn can_read_everything(&self, session: &Session) -> bool {
        if !self.have_rules() {
            return true;
        }
        self.permission_info(session).can_read_everything()
    }

    pub fn has_full_access(&self, session: &Session) -> bool {
        self.permission_info(session).has_full_access()
    }

    pub fn has_view_access(&self, session: &Session) -> bool {
        session.role.can_view()
    }

    /// Access that is neither full nor exercised in a document without
    /// user-authored rules.
    pub fn has_nuanced_access(&self, session: &Session) -> bool {
        self.have_rules() && !self.has_full_access(session)
    }

    pub fn has_table_access(&self, session: &Session, table_id: &str) -> bool {
        self.permission_info(session).table_access(table_id).read != TableRead::Deny
    }

    pub fn has_query_access(&self, session: &Session, query: &TableQuery) -> bool {
        self.has_table_access(session, &query.table_id)
    }

    /// Gate for an incoming user action. Record mutations on tables with any
    /// row-level read restriction are refused outright in this version.
    pub fn can_apply_user_action(
        &self,
        session: &Session,
        action: &UserAction,
    ) -> Result<(), RowgateError> {
        match action {
            UserAction::Calculate | UserAction::UpdateCurrentTime => Ok(()),
            UserAction::ApplyUndoActions(actions) | UserAction::ApplyDocActions(actions) => {
                self.can_apply_user_actions(session, actions)
            }
            UserAction::InitNewDoc | UserAction::EvalCode { .. } => {
                if self.has_full_access(session) {
                    Ok(())
                } else {
                    Err(RowgateError::PermissionDenied(
                        "action requires full document access".to_string(),
                    ))
                }
            }
            UserAction::SetDisplayFormula { .. } => {
                self.require_non_nuanced(session, "formula change")
            }
            UserAction::Doc(doc) if doc.is_schema_shaped() => {
                self.require_non_nuanced(session, "schema change")
            }
            UserAction::Doc(doc) => {
                let table_id = doc.table_id();
                if is_reserved_table(table_id) {
                    return self.require_non_nuanced(session, "metadata change");
                }
                if self.permission_info(session).table_access(table_id).read == TableRead::Allow {
                    Ok(())
                } else {
                    Err(RowgateError::PermissionDenied(format!(
                        "write to '{table_id}' requires unrestricted read access"
                    )))
                }
            }
            UserAction::Raw { name } => Err(RowgateError::PermissionDenied(format!(
                "unrecognized action '{name}'"
            ))),
        }
    }

    pub fn can_apply_user_actions(
        &self,
        session: &Session,
        actions: &[UserAction],
    ) -> Result<(), RowgateError> {
        for action in actions {
            self.can_apply_user_action(session, action)?;
        }
        Ok(())
    }

    fn require_non_nuanced(&self, session: &Session, what: &str) -> Result<(), RowgateError> {
        if self.has_nuanced_access(session) {
            Err(RowgateError::PermissionDenied(format!(
                "{what} is not available under nuanced access"
            )))
        } else {
            Ok(())
        }
    }

    /// Censors the metadata tables for this recipient. Identity for sessions
    /// that may read everything.
    pub fn filter_meta_tables(
        &self,
        session: &Session,
        mut meta: BTreeMap<String, TableData>,
    ) -> BTreeMap<String, TableData> {
        if !self.have_rules() || self.can_read_everything(session) {
            return meta;
        }
        censor_meta_tables(&self.permission_info(session), &mut meta);
        meta
    }

    /// In-place row and column filtering of a fetched table.
    pub fn filter_data(&self, session: &Session, data: &mut TableData) {
        if !self.have_rules() || self.can_read_everything(session) {
            return;
        }
        planner::filter_table_data(&self.permission_info(session), data);
    }

    /// Rewrites an outgoing mutation bundle for one recipient. Must run
    /// between `before_broadcast` and `after_broadcast` whenever any touched
    /// table carries row-level restrictions for this session.
    pub async fn filter_outgoing_doc_actions(
        &self,
        session: &Session,
        actions: &[DocAction],
    ) -> Result<Vec<DocAction>, RowgateError> {
        if !self.have_rules() || self.can_read_everything(session) {
            return Ok(actions.to_vec());
        }
        let info = self.permission_info(session);
        let needs_rows = actions.iter().any(|action| {
            action.is_record_shaped()
                && info.table_access(action.table_id()).read == TableRead::Mixed
        });
        let bundle = if needs_rows {
            Some(self.snapshots().await?)
        } else {
            None
        };
        let mut out = Vec::with_capacity(actions.len());
        for (index, action) in actions.iter().enumerate() {
            let step = bundle.as_ref().and_then(|b| b.steps.get(index));
            out.extend(planner::prune_outgoing_action(&info, action, step)?);
        }
        Ok(out)
    }

    /// Strips the outgoing action envelope for recipients that should not see
    /// mutation details.
    pub fn filter_action_group(&self, session: &Session, group: ActionGroup) -> ActionGroup {
        // TODO: the sense of this check looks inverted (the stripped envelope
        // goes to the sessions that may read everything, everyone else gets
        // the original); confirm the intent before changing it.
        if self.allow_action_group(session) {
            ActionGroup {
                action_num: group.action_num,
                actions: Vec::new(),
                desc: None,
            }
        } else {
            group
        }
    }

    fn allow_action_group(&self, session: &Session) -> bool {
        self.can_read_everything(session)
    }

    /// Arms the lazy row-snapshot builder for a freshly applied bundle. Call
    /// after the forward log has been applied to the authoritative store and
    /// before serving any recipient.
    pub fn before_broadcast(&self, forward: Vec<DocAction>, undo: Vec<DocAction>) {
        *self.broadcast.lock() = Some(Broadcast::new(forward, undo));
    }

    /// Discards the snapshot bundle once every recipient is served.
    pub fn after_broadcast(&self) {
        *self.broadcast.lock() = None;
    }

    async fn snapshots(&self) -> Result<Arc<RowSnapshotBundle>, RowgateError> {
        let broadcast = self.broadcast.lock().clone();
        let Some(broadcast) = broadcast else {
            return Err(RowgateError::NoActiveBroadcast);
        };
        broadcast.snapshots(self.fetcher.as_ref()).await
    }
}
