use sea_orm_migration::prelude::*;

use crate::db::*;
use obsdb_core::{FieldKind, TsField};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let mut time_series = Table::create()
            .table(TimeSeries::Table)
            .if_not_exists()
            .col(
                ColumnDef::new(TimeSeries::Id)
                    .big_integer()
                    .not_null()
                    .auto_increment()
                    .primary_key(),
            )
            .to_owned();
        for field in TsField::ALL {
            time_series.col(ts_column_def(*field));
        }
        manager.create_table(time_series).await?;

        manager
            .create_table(
                Table::create()
                    .table(GeoPoints::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(GeoPoints::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(GeoPoints::Lon).double().not_null())
                    .col(ColumnDef::new(GeoPoints::Lat).double().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_geo_point_lon_lat")
                    .table(GeoPoints::Table)
                    .col(GeoPoints::Lon)
                    .col(GeoPoints::Lat)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Observations::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Observations::TsId).big_integer().not_null())
                    .col(ColumnDef::new(Observations::Obstime).big_integer().not_null())
                    .col(ColumnDef::new(Observations::ObsId).text().not_null())
                    .col(
                        ColumnDef::new(Observations::GeoPointId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Observations::Pubtime).big_integer().not_null())
                    .col(ColumnDef::new(Observations::DataId).text().not_null())
                    .col(ColumnDef::new(Observations::History).text().not_null())
                    .col(
                        ColumnDef::new(Observations::ProcessingLevel)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Observations::QualityCode)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Observations::Camsl).double().not_null())
                    .col(ColumnDef::new(Observations::Value).double().not_null())
                    .primary_key(
                        Index::create()
                            .name("observation_pkey")
                            .col(Observations::TsId)
                            .col(Observations::Obstime),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_observation_ts")
                            .from(Observations::Table, Observations::TsId)
                            .to(TimeSeries::Table, TimeSeries::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_observation_geo_point")
                            .from(Observations::Table, Observations::GeoPointId)
                            .to(GeoPoints::Table, GeoPoints::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_observation_obstime")
                    .table(Observations::Table)
                    .col(Observations::Obstime)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_observation_geo_point")
                    .table(Observations::Table)
                    .col(Observations::GeoPointId)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Observations::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(GeoPoints::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(TimeSeries::Table).if_exists().to_owned())
            .await?;
        Ok(())
    }
}

fn ts_column_def(field: TsField) -> ColumnDef {
    let mut def = ColumnDef::new(ts_col(field));
    match field.kind() {
        FieldKind::Int64 => def.big_integer().not_null().default(0i64),
        FieldKind::String => def.text().not_null().default(""),
        FieldKind::Links => def.text().not_null().default("[]"),
    };
    def
}
