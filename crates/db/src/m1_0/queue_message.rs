use sea_query::{
    ColumnDef, Index, IndexCreateStatement, IndexDropStatement, Table, TableCreateStatement,
    TableDropStatement,
};

use crate::table::QueueMessage;

pub struct CreateTable;
pub struct CreateVisibilityIdx;

fn create_table_statement() -> TableCreateStatement {
    Table::create()
        .table(QueueMessage::Table)
        .col(
            ColumnDef::new(QueueMessage::Id)
                .string()
                .not_null()
                .string_len(26)
                .primary_key(),
        )
        .col(
            ColumnDef::new(QueueMessage::Queue)
                .string()
                .not_null()
                .string_len(80),
        )
        .col(ColumnDef::new(QueueMessage::Body).text().not_null())
        .col(ColumnDef::new(QueueMessage::Headers).json_binary().not_null())
        .col(
            ColumnDef::new(QueueMessage::Attempts)
                .big_integer()
                .not_null()
                .default(0),
        )
        .col(
            ColumnDef::new(QueueMessage::VisibleAt)
                .big_integer()
                .not_null(),
        )
        .col(
            ColumnDef::new(QueueMessage::CreatedAt)
                .big_integer()
                .not_null(),
        )
        .to_owned()
}

fn drop_table_statement() -> TableDropStatement {
    Table::drop().table(QueueMessage::Table).to_owned()
}

fn create_visibility_idx_statement() -> IndexCreateStatement {
    Index::create()
        .name("idx_queue_message_visibility")
        .table(QueueMessage::Table)
        .col(QueueMessage::Queue)
        .col(QueueMessage::VisibleAt)
        .to_owned()
}

fn drop_visibility_idx_statement() -> IndexDropStatement {
    Index::drop()
        .name("idx_queue_message_visibility")
        .table(QueueMessage::Table)
        .to_owned()
}

#[async_trait::async_trait]
impl sqlx_migrator::Operation<sqlx::Sqlite> for CreateTable {
    async fn up(
        &self,
        connection: &mut sqlx::SqliteConnection,
    ) -> Result<(), sqlx_migrator::Error> {
        let statement = create_table_statement().to_string(sea_query::SqliteQueryBuilder);
        sqlx::query(&statement).execute(connection).await?;

        Ok(())
    }

    async fn down(
        &self,
        connection: &mut sqlx::SqliteConnection,
    ) -> Result<(), sqlx_migrator::Error> {
        let statement = drop_table_statement().to_string(sea_query::SqliteQueryBuilder);
        sqlx::query(&statement).execute(connection).await?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl sqlx_migrator::Operation<sqlx::Sqlite> for CreateVisibilityIdx {
    async fn up(
        &self,
        connection: &mut sqlx::SqliteConnection,
    ) -> Result<(), sqlx_migrator::Error> {
        let statement = create_visibility_idx_statement().to_string(sea_query::SqliteQueryBuilder);
        sqlx::query(&statement).execute(connection).await?;

        Ok(())
    }

    async fn down(
        &self,
        connection: &mut sqlx::SqliteConnection,
    ) -> Result<(), sqlx_migrator::Error> {
        let statement = drop_visibility_idx_statement().to_string(sea_query::SqliteQueryBuilder);
        sqlx::query(&statement).execute(connection).await?;

        Ok(())
    }
}
