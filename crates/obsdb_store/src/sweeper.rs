use std::time::Duration;

use sea_orm::{DatabaseConnection, TransactionTrait};
use sea_orm::sea_query::{Condition, Expr, Query};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

use crate::config::ValidWindowConfig;
use crate::db::{GeoPoints, Observations, TimeSeries, exec};
use obsdb_core::{ObsError, ObsResult, ValidWindow};

/// Rows removed by one sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub observations: u64,
    pub time_series: u64,
    pub geo_points: u64,
}

/// Removes facts outside the valid window and the dimension rows they leave unreferenced.
#[derive(Clone)]
pub struct RetentionSweeper {
    conn: DatabaseConnection,
    window: ValidWindowConfig,
}

pub struct SweeperHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl RetentionSweeper {
    pub fn new(conn: DatabaseConnection, window: ValidWindowConfig) -> Self {
        Self { conn, window }
    }

    pub async fn sweep_once(&self) -> ObsResult<SweepReport> {
        let window = self.window.resolve()?;
        self.sweep_window(&window).await
    }

    /// The three deletes commit together. On SQLite this serializes the sweep with
    /// chunk writes; PostgreSQL writers can still resolve a geo point the sweep is removing.
    pub async fn sweep_window(&self, window: &ValidWindow) -> ObsResult<SweepReport> {
        let txn = self
            .conn
            .begin()
            .await
            .map_err(|err| ObsError::from(err).context("begin sweep"))?;
        let obstime = (Observations::Table, Observations::Obstime);
        let expired = Query::delete()
            .from_table(Observations::Table)
            .cond_where(
                Condition::any()
                    .add(Expr::col(obstime).lt(window.lo.as_micros()))
                    .add(Expr::col(obstime).gt(window.hi.as_micros())),
            )
            .to_owned();
        let observations = exec(&txn, &expired)
            .await
            .map_err(|err| err.context("delete expired observations"))?;

        // Dimension rows go only after the facts that referenced them.
        let unused_series = Query::delete()
            .from_table(TimeSeries::Table)
            .cond_where(
                Condition::all()
                    .not()
                    .add(Expr::exists(
                        Query::select()
                            .expr(Expr::val(1))
                            .from(Observations::Table)
                            .and_where(
                                Expr::col((Observations::Table, Observations::TsId))
                                    .equals((TimeSeries::Table, TimeSeries::Id)),
                            )
                            .to_owned(),
                    )),
            )
            .to_owned();
        let time_series = exec(&txn, &unused_series)
            .await
            .map_err(|err| err.context("delete unreferenced time_series"))?;

        let unused_points = Query::delete()
            .from_table(GeoPoints::Table)
            .cond_where(
                Condition::all()
                    .not()
                    .add(Expr::exists(
                        Query::select()
                            .expr(Expr::val(1))
                            .from(Observations::Table)
                            .and_where(
                                Expr::col((Observations::Table, Observations::GeoPointId))
                                    .equals((GeoPoints::Table, GeoPoints::Id)),
                            )
                            .to_owned(),
                    )),
            )
            .to_owned();
        let geo_points = exec(&txn, &unused_points)
            .await
            .map_err(|err| err.context("delete unreferenced geo_point"))?;

        txn.commit()
            .await
            .map_err(|err| ObsError::from(err).context("commit sweep"))?;

        let report = SweepReport {
            observations,
            time_series,
            geo_points,
        };
        log::info!(
            "retention sweep removed {} observations, {} time series, {} geo points",
            report.observations,
            report.time_series,
            report.geo_points
        );
        Ok(report)
    }

    /// Run [`Self::sweep_once`] every `period` until the handle is stopped. Failures are
    /// logged and the next tick starts over.
    pub fn start(self, period: Duration) -> SweeperHandle {
        let (shutdown, mut stop) = oneshot::channel();
        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; sweeping starts one period in.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = &mut stop => break,
                    _ = ticker.tick() => {
                        if let Err(err) = self.sweep_once().await {
                            log::warn!("retention sweep failed: {err}");
                        }
                    }
                }
            }
            log::debug!("retention sweeper stopped");
        });
        SweeperHandle { shutdown, task }
    }
}

impl SweeperHandle {
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        if let Err(err) = self.task.await {
            log::warn!("retention sweeper task ended abnormally: {err}");
        }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}
