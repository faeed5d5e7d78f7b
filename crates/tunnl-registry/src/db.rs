//! Database-backed session store
//!
//! Persists sessions through `tunnl-relay-db` so several control-plane
//! replicas can share one registry. Single-row `UPDATE ... WHERE`
//! statements carry the atomicity that [`crate::MemoryStore`] gets
//! from its lock: claiming a terminate filters on `state = 'active'`,
//! and the unique indexes on `(node, slug)` and `(node, server_port)`
//! catch races the pre-checks miss.

use std::collections::HashSet;

use async_trait::async_trait;
use sea_orm::sea_query::{Expr, SimpleExpr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set, SqlErr,
};
use tracing::{debug, error};
use uuid::Uuid;

use tunnl_proto::{
    Actor, ForwardingType, Principal, SessionKey, SessionState, Slug, SlugError, Timestamp,
    TunnelSession,
};
use tunnl_relay_db::entities::session as db_session;

use crate::error::RegistryError;
use crate::ports::pick_port;
use crate::store::{ListScope, PendingSession, PortChoice, SessionStore};

/// Attempts before giving up when auto-assigned ports keep racing
const MAX_AUTO_ATTEMPTS: usize = 3;

#[derive(Clone)]
pub struct DbStore {
    db: DatabaseConnection,
}

impl DbStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn db_unavailable(err: DbErr) -> RegistryError {
    error!(error = %err, "Database operation failed");
    RegistryError::Unavailable("database error".to_string())
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

/// Rows the actor manages: users their own sessions, node daemons
/// everything on their node
fn managed_filter(actor: &Actor) -> SimpleExpr {
    match actor {
        Actor::User(user_id) => db_session::Column::UserId.eq(user_id.clone()),
        Actor::Node(node) => db_session::Column::Node.eq(node.clone()),
    }
}

fn forwarding_to_db(value: ForwardingType) -> db_session::ForwardingType {
    match value {
        ForwardingType::Http => db_session::ForwardingType::Http,
        ForwardingType::Https => db_session::ForwardingType::Https,
        ForwardingType::Tcp => db_session::ForwardingType::Tcp,
    }
}

fn forwarding_from_db(value: db_session::ForwardingType) -> ForwardingType {
    match value {
        db_session::ForwardingType::Http => ForwardingType::Http,
        db_session::ForwardingType::Https => ForwardingType::Https,
        db_session::ForwardingType::Tcp => ForwardingType::Tcp,
    }
}

fn state_from_db(value: db_session::SessionState) -> SessionState {
    match value {
        db_session::SessionState::Pending => SessionState::Pending,
        db_session::SessionState::Active => SessionState::Active,
        db_session::SessionState::Terminated => SessionState::Terminated,
    }
}

fn model_to_session(model: db_session::Model) -> Result<TunnelSession, RegistryError> {
    let slug = Slug::parse(model.slug)
        .map_err(|_| RegistryError::Unavailable("invalid slug in session row".to_string()))?;
    Ok(TunnelSession {
        node: model.node,
        slug,
        forwarding_type: forwarding_from_db(model.forwarding_type),
        owner: model
            .user_id
            .map(Principal::from)
            .unwrap_or(Principal::Guest),
        state: state_from_db(model.state),
        started_at: Timestamp::from(model.started_at),
        server_port: model.server_port.and_then(|p| u16::try_from(p).ok()),
        local_port: model.local_port.and_then(|p| u16::try_from(p).ok()),
    })
}

enum InsertOutcome {
    Inserted(TunnelSession),
    /// Unique index caught a race; auto-assign may pick again
    Retry(RegistryError),
}

impl DbStore {
    async fn find_by_key(&self, key: &SessionKey) -> Result<Option<db_session::Model>, DbErr> {
        db_session::Entity::find()
            .filter(db_session::Column::Node.eq(key.node.clone()))
            .filter(db_session::Column::Slug.eq(key.slug.as_str()))
            .one(&self.db)
            .await
    }

    async fn reserved_ports(&self, node: &str) -> Result<HashSet<u16>, DbErr> {
        let rows = db_session::Entity::find()
            .filter(db_session::Column::Node.eq(node))
            .filter(db_session::Column::ServerPort.is_not_null())
            .all(&self.db)
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.server_port)
            .filter_map(|port| u16::try_from(port).ok())
            .collect())
    }

    async fn try_insert(&self, pending: &PendingSession) -> Result<InsertOutcome, RegistryError> {
        let server_port = match &pending.port {
            PortChoice::None => None,
            PortChoice::Explicit(port) => {
                let taken = db_session::Entity::find()
                    .filter(db_session::Column::Node.eq(pending.node.clone()))
                    .filter(db_session::Column::ServerPort.eq(*port as i32))
                    .count(&self.db)
                    .await
                    .map_err(db_unavailable)?
                    > 0;
                if taken {
                    return Err(RegistryError::Conflict(format!(
                        "port {} is already in use on node {}",
                        port, pending.node
                    )));
                }
                Some(*port)
            }
            PortChoice::Auto(restrictions) => {
                let in_use = self
                    .reserved_ports(&pending.node)
                    .await
                    .map_err(db_unavailable)?;
                let seed = format!("{}/{}", pending.node, pending.owner);
                let port = pick_port(restrictions, &in_use, &seed).ok_or_else(|| {
                    RegistryError::Unavailable(format!(
                        "no free port available on node {}",
                        pending.node
                    ))
                })?;
                Some(port)
            }
        };

        let slug = match &pending.slug {
            Some(slug) => slug.clone(),
            None => match server_port {
                Some(port) => Slug::for_port(port),
                None => return Err(RegistryError::InvalidSlug(SlugError::Empty)),
            },
        };

        let key = SessionKey::new(pending.node.clone(), slug.clone());
        if self
            .find_by_key(&key)
            .await
            .map_err(db_unavailable)?
            .is_some()
        {
            return Err(RegistryError::Conflict(format!(
                "slug '{}' is already in use on node {}",
                slug, pending.node
            )));
        }

        let row = db_session::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            node: Set(pending.node.clone()),
            slug: Set(slug.to_string()),
            forwarding_type: Set(forwarding_to_db(pending.forwarding_type)),
            user_id: Set(match &pending.owner {
                Principal::User(id) => Some(id.clone()),
                Principal::Guest => None,
            }),
            state: Set(db_session::SessionState::Pending),
            server_port: Set(server_port.map(i32::from)),
            local_port: Set(pending.local_port.map(i32::from)),
            started_at: Set(chrono::Utc::now()),
        };

        match row.insert(&self.db).await {
            Ok(model) => {
                debug!(key = %key, port = ?server_port, "Session reserved");
                Ok(InsertOutcome::Inserted(model_to_session(model)?))
            }
            Err(err) if is_unique_violation(&err) => {
                Ok(InsertOutcome::Retry(RegistryError::Conflict(format!(
                    "session key or port already in use on node {}",
                    pending.node
                ))))
            }
            Err(err) => Err(db_unavailable(err)),
        }
    }
}

#[async_trait]
impl SessionStore for DbStore {
    async fn list(&self, scope: &ListScope) -> Result<Vec<TunnelSession>, RegistryError> {
        let scope_filter = match scope {
            ListScope::OwnedBy(user_id) => db_session::Column::UserId.eq(user_id.clone()),
            ListScope::OnNode(node) => db_session::Column::Node.eq(node.clone()),
        };
        let rows = db_session::Entity::find()
            .filter(db_session::Column::State.eq(db_session::SessionState::Active))
            .filter(scope_filter)
            .order_by_asc(db_session::Column::Node)
            .order_by_asc(db_session::Column::Slug)
            .all(&self.db)
            .await
            .map_err(db_unavailable)?;
        rows.into_iter().map(model_to_session).collect()
    }

    async fn insert_pending(
        &self,
        pending: PendingSession,
    ) -> Result<TunnelSession, RegistryError> {
        // explicit requests get one shot so a lost race surfaces as
        // Conflict; auto-assign picks a fresh port and goes again
        let attempts = match pending.port {
            PortChoice::Auto(_) => MAX_AUTO_ATTEMPTS,
            _ => 1,
        };

        let mut last = RegistryError::Unavailable("session insert failed".to_string());
        for _ in 0..attempts {
            match self.try_insert(&pending).await? {
                InsertOutcome::Inserted(session) => return Ok(session),
                InsertOutcome::Retry(err) => last = err,
            }
        }
        Err(last)
    }

    async fn activate(&self, key: &SessionKey) -> Result<TunnelSession, RegistryError> {
        let result = db_session::Entity::update_many()
            .col_expr(
                db_session::Column::State,
                Expr::value(db_session::SessionState::Active),
            )
            .filter(db_session::Column::Node.eq(key.node.clone()))
            .filter(db_session::Column::Slug.eq(key.slug.as_str()))
            .filter(db_session::Column::State.ne(db_session::SessionState::Terminated))
            .exec(&self.db)
            .await
            .map_err(db_unavailable)?;
        if result.rows_affected == 0 {
            return Err(RegistryError::session_not_found(
                &key.node,
                key.slug.as_str(),
            ));
        }

        match self.find_by_key(key).await.map_err(db_unavailable)? {
            Some(model) => model_to_session(model),
            None => Err(RegistryError::session_not_found(
                &key.node,
                key.slug.as_str(),
            )),
        }
    }

    async fn rename(
        &self,
        actor: &Actor,
        node: &str,
        old: &Slug,
        new: &Slug,
    ) -> Result<TunnelSession, RegistryError> {
        let update = db_session::Entity::update_many()
            .col_expr(db_session::Column::Slug, Expr::value(new.as_str()))
            .filter(db_session::Column::Node.eq(node))
            .filter(db_session::Column::Slug.eq(old.as_str()))
            .filter(db_session::Column::State.eq(db_session::SessionState::Active))
            .filter(managed_filter(actor))
            .exec(&self.db)
            .await;

        let result = match update {
            Ok(result) => result,
            Err(err) if is_unique_violation(&err) => {
                return Err(RegistryError::Conflict(format!(
                    "slug '{}' is already in use on node {}",
                    new, node
                )));
            }
            Err(err) => return Err(db_unavailable(err)),
        };
        if result.rows_affected == 0 {
            // an active row the filter skipped belongs to someone else
            let live = db_session::Entity::find()
                .filter(db_session::Column::Node.eq(node))
                .filter(db_session::Column::Slug.eq(old.as_str()))
                .filter(db_session::Column::State.eq(db_session::SessionState::Active))
                .one(&self.db)
                .await
                .map_err(db_unavailable)?;
            return Err(match live {
                Some(_) => RegistryError::session_not_managed(node, old.as_str()),
                None => RegistryError::session_not_found(node, old.as_str()),
            });
        }
        debug!(node = %node, old = %old, new = %new, "Session renamed");

        let key = SessionKey::new(node, new.clone());
        match self.find_by_key(&key).await.map_err(db_unavailable)? {
            Some(model) => model_to_session(model),
            None => Err(RegistryError::session_not_found(node, new.as_str())),
        }
    }

    async fn claim_terminate(
        &self,
        actor: &Actor,
        node: &str,
        forwarding_type: ForwardingType,
        slug: &Slug,
    ) -> Result<TunnelSession, RegistryError> {
        // state = 'active' in the filter makes the first claim win and
        // every later one miss
        let result = db_session::Entity::update_many()
            .col_expr(
                db_session::Column::State,
                Expr::value(db_session::SessionState::Terminated),
            )
            .filter(db_session::Column::Node.eq(node))
            .filter(db_session::Column::Slug.eq(slug.as_str()))
            .filter(db_session::Column::ForwardingType.eq(forwarding_to_db(forwarding_type)))
            .filter(db_session::Column::State.eq(db_session::SessionState::Active))
            .filter(managed_filter(actor))
            .exec(&self.db)
            .await
            .map_err(db_unavailable)?;
        if result.rows_affected == 0 {
            // distinguish "someone else's session" from "no such session";
            // a forwarding-type mismatch counts as the latter
            let live = db_session::Entity::find()
                .filter(db_session::Column::Node.eq(node))
                .filter(db_session::Column::Slug.eq(slug.as_str()))
                .filter(db_session::Column::ForwardingType.eq(forwarding_to_db(forwarding_type)))
                .filter(db_session::Column::State.eq(db_session::SessionState::Active))
                .one(&self.db)
                .await
                .map_err(db_unavailable)?;
            return Err(match live {
                Some(_) => RegistryError::session_not_managed(node, slug.as_str()),
                None => RegistryError::session_not_found(node, slug.as_str()),
            });
        }
        debug!(node = %node, slug = %slug, "Session claimed for termination");

        let key = SessionKey::new(node, slug.clone());
        match self.find_by_key(&key).await.map_err(db_unavailable)? {
            Some(model) => model_to_session(model),
            None => Err(RegistryError::session_not_found(node, slug.as_str())),
        }
    }

    async fn remove(&self, key: &SessionKey) -> Result<Option<TunnelSession>, RegistryError> {
        let Some(model) = self.find_by_key(key).await.map_err(db_unavailable)? else {
            return Ok(None);
        };
        db_session::Entity::delete_by_id(model.id.clone())
            .exec(&self.db)
            .await
            .map_err(db_unavailable)?;
        debug!(key = %key, "Session removed");
        model_to_session(model).map(Some)
    }

    async fn count_active(&self) -> Result<u64, RegistryError> {
        db_session::Entity::find()
            .filter(db_session::Column::State.eq(db_session::SessionState::Active))
            .count(&self.db)
            .await
            .map_err(db_unavailable)
    }
}
