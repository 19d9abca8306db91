//! Risk scoring and braking decisions for confirmed detections

use crate::config::{DecisionConfig, KinematicsConfig, RiskConfig};
use crate::types::{AssessedDetection, ConfirmedDetection, Decision, FilteredDetection, RiskAssessment};
use hazardtrack::{estimate_distance, stopping_distance, time_to_collision};
use rayon::prelude::*;

const DISTANCE_WEIGHT: f32 = 0.60;
const CONFIDENCE_WEIGHT: f32 = 0.25;
const SPEED_WEIGHT: f32 = 0.15;

/// Assessments for one frame plus the worst-case aggregate
#[derive(Debug, Clone, PartialEq)]
pub struct FrameAssessment {
    pub detections: Vec<AssessedDetection>,
    pub overall_risk_score: f32,
    pub overall_decision: Decision,
}

/// Stateless engine; all tuning comes from configuration
#[derive(Debug, Clone)]
pub struct RiskEngine {
    kinematics: KinematicsConfig,
    decision: DecisionConfig,
    risk: RiskConfig,
}

impl RiskEngine {
    pub fn new(kinematics: KinematicsConfig, decision: DecisionConfig, risk: RiskConfig) -> Self {
        Self {
            kinematics,
            decision,
            risk,
        }
    }

    /// Assess a single detection at the given vehicle speed
    pub fn assess(&self, detection: &FilteredDetection, speed_kmph: f32) -> RiskAssessment {
        let kin = &self.kinematics;
        let distance_m = estimate_distance(
            &detection.bbox,
            kin.calibration_constant,
            kin.min_distance_m,
            kin.max_distance_m,
        );
        let ttc_s = time_to_collision(distance_m, speed_kmph);
        let risk_score = self.risk_score(distance_m, detection.confidence, speed_kmph, &detection.class_label);
        let decision = self.decide(distance_m, ttc_s, speed_kmph);

        RiskAssessment {
            distance_m,
            ttc_s,
            risk_score,
            decision,
        }
    }

    /// Weighted normalized factors, scaled by class weight and clipped to [0, 100]
    pub fn risk_score(&self, distance_m: f32, confidence: f32, speed_kmph: f32, class_label: &str) -> f32 {
        let distance_factor = (1.0 - distance_m / self.risk.distance_horizon_m).clamp(0.0, 1.0);
        let confidence_factor = confidence.clamp(0.0, 1.0);
        let speed_factor = (speed_kmph / self.risk.max_speed_kmph).clamp(0.0, 1.0);

        let base = DISTANCE_WEIGHT * distance_factor
            + CONFIDENCE_WEIGHT * confidence_factor
            + SPEED_WEIGHT * speed_factor;
        (100.0 * base * self.risk.weight_for(class_label)).clamp(0.0, 100.0)
    }

    /// Top-down decision policy, most severe rule first
    pub fn decide(&self, distance_m: f32, ttc_s: f32, speed_kmph: f32) -> Decision {
        let cfg = &self.decision;
        let stop = stopping_distance(
            speed_kmph,
            self.kinematics.reaction_time_s,
            self.kinematics.deceleration_mps2,
        );

        if distance_m <= cfg.emergency_stop_ratio * stop || ttc_s <= cfg.emergency_ttc_s {
            Decision::BrakeEmergency
        } else if distance_m <= cfg.slow_down_stop_ratio * stop {
            Decision::SlowDown
        } else if distance_m <= cfg.warning_distance_m {
            Decision::Caution
        } else {
            Decision::Clear
        }
    }

    /// Assess every confirmed detection of a frame and fold the worst case.
    /// Output order matches input order.
    pub fn assess_frame(&self, confirmed: Vec<ConfirmedDetection>, speed_kmph: f32) -> FrameAssessment {
        let detections: Vec<AssessedDetection> = confirmed
            .into_par_iter()
            .map(|c| {
                let assessment = self.assess(&c.item, speed_kmph);
                AssessedDetection::new(c, assessment)
            })
            .collect();

        let overall_risk_score = detections
            .iter()
            .map(|d| d.assessment.risk_score)
            .fold(0.0_f32, f32::max);
        let overall_decision = detections
            .iter()
            .map(|d| d.assessment.decision)
            .max()
            .unwrap_or_default();

        FrameAssessment {
            detections,
            overall_risk_score,
            overall_decision,
        }
    }
}
