use sea_query::{ColumnDef, Table, TableCreateStatement, TableDropStatement};

use crate::table::SchedulerJob;

pub struct CreateTable;

fn create_table_statement() -> TableCreateStatement {
    Table::create()
        .table(SchedulerJob::Table)
        .col(
            ColumnDef::new(SchedulerJob::Id)
                .string()
                .not_null()
                .string_len(80)
                .primary_key(),
        )
        .col(ColumnDef::new(SchedulerJob::Data).json_binary().not_null())
        .col(ColumnDef::new(SchedulerJob::FireAt).big_integer().not_null())
        .col(
            ColumnDef::new(SchedulerJob::MisfireWindowSecs)
                .big_integer()
                .not_null(),
        )
        .col(ColumnDef::new(SchedulerJob::LockedBy).string().string_len(64))
        .col(ColumnDef::new(SchedulerJob::LockedAt).big_integer())
        .to_owned()
}

fn drop_table_statement() -> TableDropStatement {
    Table::drop().table(SchedulerJob::Table).to_owned()
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
