//! VirtualPointEngine: evaluates calculated points in dependency order
//! and applies each point's configured error handling when its formula
//! fails.

use crate::cache_writer::CacheWriter;
use chrono::Utc;
use collector_calc::{CalcEngine, DependencyGraph, StateStore};
use collector_model::value::Quality;
use collector_model::virtual_point::{ErrorHandling, Trigger, VirtualPoint};
use collector_model::PointId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub struct VirtualPointEngine<S: StateStore> {
    points: HashMap<PointId, RwLock<VirtualPoint>>,
    graph: DependencyGraph,
    calc: CalcEngine<S>,
    cache_writer: Arc<CacheWriter>,
    script_deadline: Duration,
}

impl<S: StateStore> VirtualPointEngine<S> {
    /// Builds the dependency graph from each point's inputs and rejects
    /// the set up front if it contains a cycle.
    pub fn new(
        virtual_points: Vec<VirtualPoint>,
        calc: CalcEngine<S>,
        cache_writer: Arc<CacheWriter>,
        script_deadline: Duration,
    ) -> collector_errors::Result<Self> {
        let mut graph = DependencyGraph::new();
        for vp in &virtual_points {
            let inputs = vp.inputs.iter().map(|i| i.source_point_id).collect();
            graph.add_node(vp.id, inputs);
        }
        graph.topological_order()?;

        let points = virtual_points
            .into_iter()
            .map(|vp| (vp.id, RwLock::new(vp)))
            .collect();

        Ok(Self {
            points,
            graph,
            calc,
            cache_writer,
            script_deadline,
        })
    }

    /// Recalculates every virtual point downstream of `source_point_id`
    /// (a change in a raw data point or another virtual point), in
    /// topological order so an input is always fresh before its
    /// dependent is evaluated.
    pub async fn on_point_changed(&self, source_point_id: PointId, point_values: &HashMap<PointId, f64>) -> Vec<(PointId, f64)> {
        let mut downstream = self.graph.downstream_of(source_point_id);
        if downstream.is_empty() {
            return Vec::new();
        }
        let order = self.graph.topological_order().unwrap_or_default();
        downstream.sort_by_key(|id| order.iter().position(|o| o == id).unwrap_or(usize::MAX));

        let mut results = Vec::new();
        let mut live_values = point_values.clone();
        for vp_id in downstream {
            if let Some(value) = self.evaluate_one(vp_id, &live_values).await {
                live_values.insert(vp_id, value);
                results.push((vp_id, value));
            }
        }
        results
    }

    /// Evaluates every point whose trigger is `PERIODIC`, called by the
    /// runtime's periodic ticker.
    pub async fn evaluate_periodic(&self, point_values: &HashMap<PointId, f64>) -> Vec<(PointId, f64)> {
        let periodic_ids: Vec<PointId> = self
            .points
            .iter()
            .filter(|(_, vp)| vp.read().trigger == Trigger::Periodic && vp.read().enabled)
            .map(|(id, _)| *id)
            .collect();

        let mut results = Vec::new();
        for id in periodic_ids {
            if let Some(value) = self.evaluate_one(id, point_values).await {
                results.push((id, value));
            }
        }
        results
    }

    pub async fn evaluate_on_demand(&self, point_id: PointId, point_values: &HashMap<PointId, f64>) -> Option<f64> {
        self.evaluate_one(point_id, point_values).await
    }

    async fn evaluate_one(&self, point_id: PointId, point_values: &HashMap<PointId, f64>) -> Option<f64> {
        let Some(lock) = self.points.get(&point_id) else {
            return None;
        };
        let (formula, inputs, error_handling, default_value, last_value, enabled, data_type) = {
            let vp = lock.read();
            (
                vp.formula.clone(),
                vp.inputs.clone(),
                vp.error_handling,
                vp.default_value,
                vp.last_value,
                vp.enabled,
                vp.data_type,
            )
        };
        if !enabled {
            return None;
        }

        let mut variables = HashMap::with_capacity(inputs.len());
        for input in &inputs {
            match point_values.get(&input.source_point_id) {
                Some(v) => {
                    variables.insert(input.alias.clone(), *v);
                }
                None => {
                    let fallback = self.apply_error_handling(point_id, error_handling, default_value, last_value);
                    self.write_fallback_result(point_id, fallback).await;
                    return fallback;
                }
            }
        }

        let result = self
            .calc
            .evaluate(&formula, &variables, point_values, self.script_deadline)
            .await;

        let timestamp = Utc::now().timestamp_millis();
        let value = match result {
            Ok(raw) => match data_type.coerce_f64(raw) {
                Some(coerced) => {
                    let mut vp = lock.write();
                    vp.last_value = Some(coerced);
                    vp.last_calc_time = Some(timestamp);
                    coerced
                }
                None => {
                    warn!(point_id, raw, ?data_type, "virtual point result did not coerce to its declared data type");
                    self.cache_writer
                        .write_virtual_point_result(point_id, raw, Quality::Bad, timestamp)
                        .await;
                    return None;
                }
            },
            Err(e) => {
                warn!(point_id, error = %e, "virtual point evaluation failed");
                let fallback = self.apply_error_handling(point_id, error_handling, default_value, last_value);
                self.write_fallback_result(point_id, fallback).await;
                return fallback;
            }
        };

        self.cache_writer
            .write_virtual_point_result(point_id, value, Quality::Good, timestamp)
            .await;
        Some(value)
    }

    async fn write_fallback_result(&self, point_id: PointId, fallback: Option<f64>) {
        if let Some(v) = fallback {
            self.cache_writer
                .write_virtual_point_result(point_id, v, Quality::Uncertain, Utc::now().timestamp_millis())
                .await;
        }
    }

    fn apply_error_handling(
        &self,
        point_id: PointId,
        error_handling: ErrorHandling,
        default_value: Option<f64>,
        last_value: Option<f64>,
    ) -> Option<f64> {
        match error_handling {
            ErrorHandling::ReturnNull => None,
            ErrorHandling::ReturnLast => last_value,
            ErrorHandling::ReturnZero => Some(0.0),
            ErrorHandling::ReturnDefault => {
                if default_value.is_none() {
                    warn!(point_id, "RETURN_DEFAULT configured with no default_value");
                }
                default_value
            }
        }
    }
}
