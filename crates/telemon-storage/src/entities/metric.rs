use sea_orm::entity::prelude::*;

/// One row per metric. `metric_value_int` is set for counters and
/// `metric_value_float` for gauges.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "metrics")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub metric_type: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub metric_name: String,
    pub metric_value_int: Option<i64>,
    pub metric_value_float: Option<f64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
