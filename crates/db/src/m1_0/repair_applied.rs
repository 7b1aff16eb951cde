use sea_query::{ColumnDef, Table, TableCreateStatement, TableDropStatement};

use crate::table::RepairApplied;

pub struct CreateTable;

fn create_table_statement() -> TableCreateStatement {
    Table::create()
        .table(RepairApplied::Table)
        .col(
            ColumnDef::new(RepairApplied::Id)
                .string()
                .not_null()
                .string_len(80)
                .primary_key(),
        )
        .col(
            ColumnDef::new(RepairApplied::AppliedAt)
                .big_integer()
                .not_null(),
        )
        .to_owned()
}

fn drop_table_statement() -> TableDropStatement {
    Table::drop().table(RepairApplied::Table).to_owned()
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
