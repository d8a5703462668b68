use lastmile_config::ScoringPolicy;
use lastmile_domain::{Courier, CourierStatus, Delivery, VehicleType};
use serde::Serialize;
use tracing::debug;

/// 按收件地址前缀划分的配送区域
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AreaGroup {
    pub area_key: String,
    pub deliveries: Vec<Delivery>,
}

impl AreaGroup {
    pub fn delivery_ids(&self) -> Vec<String> {
        self.deliveries.iter().map(|d| d.id.clone()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RouteEstimate {
    pub distance_km: f64,
    pub duration_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assignment {
    pub area_key: String,
    pub deliveries: Vec<Delivery>,
    pub courier: Courier,
    pub score: f64,
    pub route: RouteEstimate,
}

impl Assignment {
    pub fn delivery_ids(&self) -> Vec<String> {
        self.deliveries.iter().map(|d| d.id.clone()).collect()
    }
}

/// 每个区域的调度结果，没有可用快递员时明确返回 `Unassignable`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum GroupDecision {
    Assigned(Assignment),
    Unassignable {
        area_key: String,
        deliveries: Vec<Delivery>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatchPlan {
    /// 与区域首次出现的顺序一致
    pub decisions: Vec<GroupDecision>,
}

impl DispatchPlan {
    pub fn assignments(&self) -> impl Iterator<Item = &Assignment> {
        self.decisions.iter().filter_map(|d| match d {
            GroupDecision::Assigned(assignment) => Some(assignment),
            GroupDecision::Unassignable { .. } => None,
        })
    }

    pub fn unassignable(&self) -> impl Iterator<Item = (&str, &[Delivery])> {
        self.decisions.iter().filter_map(|d| match d {
            GroupDecision::Unassignable {
                area_key,
                deliveries,
            } => Some((area_key.as_str(), deliveries.as_slice())),
            GroupDecision::Assigned(_) => None,
        })
    }

    /// 已分配的区域按评分从高到低排列，同分保持原顺序
    pub fn ranked(&self) -> Vec<&Assignment> {
        let mut ranked: Vec<&Assignment> = self.assignments().collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        ranked
    }
}

/// 贪心的区域评分调度器
///
/// 每个区域独立挑选得分最高的快递员，后面的区域不会回头修改前面区域的选择。
#[derive(Debug, Clone, Default)]
pub struct DispatchScorer {
    policy: ScoringPolicy,
}

impl DispatchScorer {
    pub fn new(policy: ScoringPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ScoringPolicy {
        &self.policy
    }

    /// 去掉所有空白并转小写后取前 N 个字符
    pub fn area_key(&self, address: &str) -> String {
        address
            .chars()
            .filter(|c| !c.is_whitespace())
            .flat_map(char::to_lowercase)
            .take(self.policy.area_prefix_chars)
            .collect()
    }

    pub fn group(&self, deliveries: Vec<Delivery>) -> Vec<AreaGroup> {
        let mut groups: Vec<AreaGroup> = Vec::new();

        for delivery in deliveries {
            let key = self.area_key(&delivery.receiver_address);
            match groups.iter_mut().find(|g| g.area_key == key) {
                Some(group) => group.deliveries.push(delivery),
                None => groups.push(AreaGroup {
                    area_key: key,
                    deliveries: vec![delivery],
                }),
            }
        }

        groups
    }

    pub fn has_heavy_item(&self, group: &AreaGroup) -> bool {
        group
            .deliveries
            .iter()
            .any(|d| d.weight_kg > self.policy.heavy_weight_threshold_kg)
    }

    pub fn score(&self, group: &AreaGroup, courier: &Courier) -> f64 {
        let policy = &self.policy;
        let mut score = policy.base_score;

        score -= policy.delivery_load_penalty * f64::from(courier.total_deliveries);

        let heavy = self.has_heavy_item(group);
        match courier.vehicle_type {
            VehicleType::Car if heavy => score += policy.heavy_car_bonus,
            VehicleType::Motorcycle if !heavy => score += policy.light_motorcycle_bonus,
            _ => {}
        }

        score += policy.rating_multiplier * courier.rating.unwrap_or(policy.default_rating);

        if courier.status == CourierStatus::Busy {
            score -= policy.busy_penalty;
        }

        score
    }

    /// 为一个区域挑选快递员
    ///
    /// 停用的快递员永远不参与；只有在没有任何非负分的在线快递员时才会考虑忙碌的快递员。
    /// 同分时列表中靠前的快递员胜出。
    pub fn select<'a>(&self, group: &AreaGroup, couriers: &'a [Courier]) -> Option<(&'a Courier, f64)> {
        let scored: Vec<(&Courier, f64)> = couriers
            .iter()
            .filter(|c| c.is_dispatchable())
            .map(|c| (c, self.score(group, c)))
            .collect();

        let best_active = pick_best(scored.iter().copied().filter(|(c, _)| c.is_active()));
        if let Some((courier, score)) = best_active {
            if score >= 0.0 {
                return Some((courier, score));
            }
        }

        pick_best(scored.iter().copied())
    }

    pub fn route_estimate(&self, delivery_count: usize) -> RouteEstimate {
        RouteEstimate {
            distance_km: self.policy.km_per_delivery * delivery_count as f64,
            duration_minutes: self.policy.minutes_per_delivery * delivery_count as u32,
        }
    }

    pub fn plan(&self, deliveries: Vec<Delivery>, couriers: &[Courier]) -> DispatchPlan {
        let decisions = self
            .group(deliveries)
            .into_iter()
            .map(|group| match self.select(&group, couriers) {
                Some((courier, score)) => {
                    debug!(
                        "区域 {} 选择快递员 {} (评分: {:.1})",
                        group.area_key, courier.id, score
                    );
                    GroupDecision::Assigned(Assignment {
                        route: self.route_estimate(group.deliveries.len()),
                        area_key: group.area_key,
                        deliveries: group.deliveries,
                        courier: courier.clone(),
                        score,
                    })
                }
                None => {
                    debug!("区域 {} 没有可用的快递员", group.area_key);
                    GroupDecision::Unassignable {
                        area_key: group.area_key,
                        deliveries: group.deliveries,
                    }
                }
            })
            .collect();

        DispatchPlan { decisions }
    }
}

/// 严格大于才替换，保证同分时先出现的胜出
fn pick_best<'a>(
    candidates: impl Iterator<Item = (&'a Courier, f64)>,
) -> Option<(&'a Courier, f64)> {
    let mut best: Option<(&'a Courier, f64)> = None;
    for (courier, score) in candidates {
        if best.is_none_or(|(_, best_score)| score > best_score) {
            best = Some((courier, score));
        }
    }
    best
}

#[cfg(test)]
mod scorer_tests {
    use super::*;
    use chrono::Utc;
    use lastmile_domain::NewDelivery;

    fn delivery(id: &str, address: &str, weight_kg: f64) -> Delivery {
        NewDelivery {
            id: id.to_string(),
            sender_name: "s".to_string(),
            sender_phone: "1".to_string(),
            sender_address: "a".to_string(),
            receiver_name: "r".to_string(),
            receiver_phone: "2".to_string(),
            receiver_address: address.to_string(),
            weight_kg,
        }
        .into_delivery(Utc::now())
    }

    #[test]
    fn test_area_key_normalization() {
        let scorer = DispatchScorer::default();
        assert_eq!(scorer.area_key("Yangon Bahan No.5"), "yangon");
        assert_eq!(scorer.area_key("  Ya ng  onXYZ"), "yangon");
        assert_eq!(scorer.area_key("MDY"), "mdy");
        assert_eq!(scorer.area_key("曼德勒 市中心 第三街"), "曼德勒市中心");
    }

    #[test]
    fn test_groups_keep_first_appearance_order() {
        let scorer = DispatchScorer::default();
        let groups = scorer.group(vec![
            delivery("A1", "Mandalay 35th St", 1.0),
            delivery("B1", "Yangon Bahan", 1.0),
            delivery("A2", "Mandalay 78th St", 1.0),
        ]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].area_key, "mandal");
        assert_eq!(groups[0].delivery_ids(), vec!["A1", "A2"]);
        assert_eq!(groups[1].delivery_ids(), vec!["B1"]);
    }

    #[test]
    fn test_heavy_threshold_is_exclusive() {
        let scorer = DispatchScorer::default();
        let at_threshold = AreaGroup {
            area_key: "k".to_string(),
            deliveries: vec![delivery("P", "k", 5.0)],
        };
        assert!(!scorer.has_heavy_item(&at_threshold));

        let above = AreaGroup {
            area_key: "k".to_string(),
            deliveries: vec![delivery("P", "k", 5.1)],
        };
        assert!(scorer.has_heavy_item(&above));
    }

    #[test]
    fn test_route_estimate() {
        let scorer = DispatchScorer::default();
        let route = scorer.route_estimate(4);
        assert_eq!(route.distance_km, 14.0);
        assert_eq!(route.duration_minutes, 100);
    }
}
