//! Rejection routing.
//!
//! Every rejection category has a handler, the agent that reworks the step,
//! and an escalation target. A rejection goes to its handler until its retry
//! count reaches the category limit, then to the target.

use std::collections::BTreeMap;
use std::sync::Arc;

use folio_config::EscalationConfig;
use folio_store::Database;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::category::RejectionCategory;
use crate::error::EscalationError;
use crate::rejection::{Rejection, get_rejection, list_rejections};

#[cfg(test)]
#[path = "router_tests.rs"]
mod tests;

/// Routing configuration of one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub category: RejectionCategory,
    pub handler: String,
    pub max_retries: u32,
    pub escalation_target: String,
}

/// Where a single rejection goes next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub rejection_id: String,
    pub run_id: String,
    pub category: RejectionCategory,
    /// The category handler, or the escalation target once escalating.
    pub handler: String,
    pub should_escalate: bool,
    pub retry_count: u32,
    pub max_retries: u32,
    pub escalation_target: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingStats {
    pub total_routed: usize,
    pub by_category: BTreeMap<String, usize>,
    pub by_handler: BTreeMap<String, usize>,
    /// Rejections whose retry count reached the category limit.
    pub escalations: usize,
}

/// Maps rejections to the agent or human that handles them.
#[derive(Clone)]
pub struct RejectionRouter {
    db: Database,
    config: Arc<EscalationConfig>,
}

impl RejectionRouter {
    pub fn new(db: Database, config: EscalationConfig) -> Self {
        Self {
            db,
            config: Arc::new(config),
        }
    }

    pub fn route(&self, category: RejectionCategory) -> Route {
        let name = category.as_str();
        Route {
            category,
            handler: self.config.handler_for(name).to_string(),
            max_retries: self.config.threshold_for(name),
            escalation_target: self.config.target_for(name).to_string(),
        }
    }

    /// Routes of every category, in category order.
    pub fn routes(&self) -> Vec<Route> {
        RejectionCategory::ALL
            .into_iter()
            .map(|category| self.route(category))
            .collect()
    }

    pub fn handler_for(&self, category: RejectionCategory) -> &str {
        self.config.handler_for(category.as_str())
    }

    fn decide(&self, rejection: &Rejection) -> RouteDecision {
        let route = self.route(rejection.category);
        let should_escalate = rejection.retry_count >= route.max_retries;
        let handler = if should_escalate {
            route.escalation_target.clone()
        } else {
            route.handler
        };
        RouteDecision {
            rejection_id: rejection.id.clone(),
            run_id: rejection.run_id.clone(),
            category: rejection.category,
            handler,
            should_escalate,
            retry_count: rejection.retry_count,
            max_retries: route.max_retries,
            escalation_target: route.escalation_target,
        }
    }

    /// Route a recorded rejection.
    pub async fn route_rejection(&self, id: &str) -> Result<RouteDecision, EscalationError> {
        let id = id.to_string();
        let rejection = self
            .db
            .call(move |conn| {
                get_rejection(conn, &id)?.ok_or(EscalationError::RejectionNotFound(id))
            })
            .await?;

        let decision = self.decide(&rejection);
        debug!(
            "Routed {} rejection {} to {} (retry {}/{})",
            decision.category,
            decision.rejection_id,
            decision.handler,
            decision.retry_count,
            decision.max_retries
        );
        Ok(decision)
    }

    /// Routing counts over every rejection, or those of one run.
    pub async fn get_routing_stats(
        &self,
        run_id: Option<&str>,
    ) -> Result<RoutingStats, EscalationError> {
        let run_id = run_id.map(str::to_string);
        let rejections = self
            .db
            .call(move |conn| list_rejections(conn, run_id.as_deref()))
            .await?;

        let mut stats = RoutingStats {
            total_routed: rejections.len(),
            ..Default::default()
        };
        for rejection in &rejections {
            let decision = self.decide(rejection);
            *stats
                .by_category
                .entry(decision.category.as_str().to_string())
                .or_default() += 1;
            *stats.by_handler.entry(decision.handler).or_default() += 1;
            if decision.should_escalate {
                stats.escalations += 1;
            }
        }
        Ok(stats)
    }
}
