//! Session entity: one row per live forwarding session

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Forwarding type as stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum ForwardingType {
    #[sea_orm(string_value = "http")]
    Http,

    #[sea_orm(string_value = "https")]
    Https,

    #[sea_orm(string_value = "tcp")]
    Tcp,
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum SessionState {
    /// Listener negotiation in progress; holds the (node, slug) key
    #[sea_orm(string_value = "pending")]
    Pending,

    /// Externally visible steady state
    #[sea_orm(string_value = "active")]
    Active,

    /// Claimed by a terminate; the row is deleted once the listener
    /// is released
    #[sea_orm(string_value = "terminated")]
    Terminated,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sessions")]
pub struct Model {
    /// Registry-assigned row id (UUID)
    #[sea_orm(primary_key, auto_increment = false, column_type = "String(StringLen::N(36))")]
    pub id: String,

    /// Exit node the session lives on
    pub node: String,

    /// Public slug, unique with `node` among non-terminated sessions
    pub slug: String,

    pub forwarding_type: ForwardingType,

    /// Owning user; NULL for guest sessions
    pub user_id: Option<String>,

    pub state: SessionState,

    /// Bound server port for TCP sessions, unique per node
    pub server_port: Option<i32>,

    /// Advisory local port reported by the node
    pub local_port: Option<i32>,

    /// When the session was opened
    pub started_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
