use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m001_metrics"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.get_connection().execute_unprepared(UP_SQL).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(DOWN_SQL)
            .await?;
        Ok(())
    }
}

// Exactly one of the value columns is populated, matching metric_type.
const UP_SQL: &str = "
CREATE TABLE IF NOT EXISTS metrics (
    metric_type VARCHAR(16) NOT NULL,
    metric_name VARCHAR(255) NOT NULL,
    metric_value_int BIGINT,
    metric_value_float DOUBLE PRECISION,
    PRIMARY KEY (metric_type, metric_name)
);
";

const DOWN_SQL: &str = "DROP TABLE IF EXISTS metrics;";
