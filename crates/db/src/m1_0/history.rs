use sea_query::{
    ColumnDef, Index, IndexCreateStatement, IndexDropStatement, Table, TableCreateStatement,
    TableDropStatement,
};

use crate::table::History;

pub struct CreateTable;
pub struct CreateTraineeIdx;
pub struct CreateReferenceIdx;
pub struct CreateStatusSentAtIdx;

fn create_table_statement() -> TableCreateStatement {
    Table::create()
        .table(History::Table)
        .col(
            ColumnDef::new(History::Id)
                .string()
                .not_null()
                .string_len(26)
                .primary_key(),
        )
        .col(
            ColumnDef::new(History::TraineeId)
                .string()
                .not_null()
                .string_len(48),
        )
        .col(ColumnDef::new(History::RefKind).string().string_len(32))
        .col(ColumnDef::new(History::RefId).string().string_len(48))
        .col(ColumnDef::new(History::Kind).string().not_null().string_len(48))
        .col(
            ColumnDef::new(History::Channel)
                .string()
                .not_null()
                .string_len(10),
        )
        .col(ColumnDef::new(History::Contact).string().string_len(320))
        .col(
            ColumnDef::new(History::TemplateName)
                .string()
                .not_null()
                .string_len(64),
        )
        .col(
            ColumnDef::new(History::TemplateVersion)
                .string()
                .not_null()
                .string_len(16),
        )
        .col(ColumnDef::new(History::Variables).json_binary().not_null())
        .col(ColumnDef::new(History::Attachments).json_binary().not_null())
        .col(ColumnDef::new(History::SentAt).big_integer())
        .col(ColumnDef::new(History::ReadAt).big_integer())
        .col(
            ColumnDef::new(History::Status)
                .string()
                .not_null()
                .string_len(16),
        )
        .col(ColumnDef::new(History::StatusDetail).string().string_len(512))
        .col(ColumnDef::new(History::LatestStatusEventAt).big_integer())
        .col(ColumnDef::new(History::LastRetry).big_integer())
        .to_owned()
}

fn drop_table_statement() -> TableDropStatement {
    Table::drop().table(History::Table).to_owned()
}

fn create_trainee_idx_statement() -> IndexCreateStatement {
    Index::create()
        .name("idx_history_trainee")
        .table(History::Table)
        .col(History::TraineeId)
        .to_owned()
}

fn create_reference_idx_statement() -> IndexCreateStatement {
    Index::create()
        .name("idx_history_trainee_reference")
        .table(History::Table)
        .col(History::TraineeId)
        .col(History::RefKind)
        .col(History::RefId)
        .to_owned()
}

fn create_status_sent_at_idx_statement() -> IndexCreateStatement {
    Index::create()
        .name("idx_history_status_sent_at")
        .table(History::Table)
        .col(History::Status)
        .col(History::SentAt)
        .to_owned()
}

fn drop_idx_statement(name: &str) -> IndexDropStatement {
    Index::drop().name(name).table(History::Table).to_owned()
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
impl sqlx_migrator::Operation<sqlx::Sqlite> for CreateTraineeIdx {
    async fn up(
        &self,
        connection: &mut sqlx::SqliteConnection,
    ) -> Result<(), sqlx_migrator::Error> {
        let statement = create_trainee_idx_statement().to_string(sea_query::SqliteQueryBuilder);
        sqlx::query(&statement).execute(connection).await?;

        Ok(())
    }

    async fn down(
        &self,
        connection: &mut sqlx::SqliteConnection,
    ) -> Result<(), sqlx_migrator::Error> {
        let statement =
            drop_idx_statement("idx_history_trainee").to_string(sea_query::SqliteQueryBuilder);
        sqlx::query(&statement).execute(connection).await?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl sqlx_migrator::Operation<sqlx::Sqlite> for CreateReferenceIdx {
    async fn up(
        &self,
        connection: &mut sqlx::SqliteConnection,
    ) -> Result<(), sqlx_migrator::Error> {
        let statement = create_reference_idx_statement().to_string(sea_query::SqliteQueryBuilder);
        sqlx::query(&statement).execute(connection).await?;

        Ok(())
    }

    async fn down(
        &self,
        connection: &mut sqlx::SqliteConnection,
    ) -> Result<(), sqlx_migrator::Error> {
        let statement = drop_idx_statement("idx_history_trainee_reference")
            .to_string(sea_query::SqliteQueryBuilder);
        sqlx::query(&statement).execute(connection).await?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl sqlx_migrator::Operation<sqlx::Sqlite> for CreateStatusSentAtIdx {
    async fn up(
        &self,
        connection: &mut sqlx::SqliteConnection,
    ) -> Result<(), sqlx_migrator::Error> {
        let statement =
            create_status_sent_at_idx_statement().to_string(sea_query::SqliteQueryBuilder);
        sqlx::query(&statement).execute(connection).await?;

        Ok(())
    }

    async fn down(
        &self,
        connection: &mut sqlx::SqliteConnection,
    ) -> Result<(), sqlx_migrator::Error> {
        let statement = drop_idx_statement("idx_history_status_sent_at")
            .to_string(sea_query::SqliteQueryBuilder);
        sqlx::query(&statement).execute(connection).await?;

        Ok(())
    }
}
