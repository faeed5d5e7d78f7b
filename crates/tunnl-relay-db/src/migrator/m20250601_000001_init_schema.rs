//! Initial schema: the sessions table and its uniqueness indexes

use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Session::Table)
                    .if_not_exists()
                    .col(string_len(Session::Id, 36).primary_key())
                    .col(string_len(Session::Node, 64))
                    .col(string_len(Session::Slug, 64))
                    .col(string_len(Session::ForwardingType, 16))
                    .col(string_len_null(Session::UserId, 255))
                    .col(string_len(Session::State, 16))
                    .col(integer_null(Session::ServerPort))
                    .col(integer_null(Session::LocalPort))
                    .col(
                        timestamp_with_time_zone(Session::StartedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // (node, slug) identifies a session among non-terminated rows;
        // terminated rows are deleted, so a plain unique index holds it
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_sessions_node_slug")
                    .table(Session::Table)
                    .col(Session::Node)
                    .col(Session::Slug)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // One listener per port per node; NULLs (HTTP-family sessions)
        // do not collide
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_sessions_node_server_port")
                    .table(Session::Table)
                    .col(Session::Node)
                    .col(Session::ServerPort)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_sessions_user_id")
                    .table(Session::Table)
                    .col(Session::UserId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Session::Table).to_owned())
            .await?;

        Ok(())
    }
}

// ============================================================
// Table identifiers
// ============================================================

#[derive(DeriveIden)]
enum Session {
    #[sea_orm(iden = "sessions")]
    Table,
    Id,
    Node,
    Slug,
    ForwardingType,
    UserId,
    State,
    ServerPort,
    LocalPort,
    StartedAt,
}
