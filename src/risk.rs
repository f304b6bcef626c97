use serde::{Deserialize, Serialize};

/// Body temperature fed to the model when no temperature sensor is attached.
pub const DEFAULT_TEMPERATURE: f64 = 37.0;

// Trained offline, only inference happens here.
const HR_ONLY_WEIGHT_HR: f64 = 0.025592365059655283;
const HR_ONLY_BIAS: f64 = -8.616429237372008;

const HR_TEMP_WEIGHT_HR: f64 = 0.13071517041228678;
const HR_TEMP_WEIGHT_TEMP: f64 = 2.4987513048592267;
const HR_TEMP_BIAS: f64 = -107.60939401683565;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector {
    pub avg_hr: f64,
    pub temperature: f64,
}

impl FeatureVector {
    pub fn new(avg_hr: f64, temperature: f64) -> Self {
        FeatureVector { avg_hr, temperature }
    }

    pub fn from_heart_rate(avg_hr: f64) -> Self {
        FeatureVector::new(avg_hr, DEFAULT_TEMPERATURE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskResult {
    pub hr: f64,
    pub z: f64,
    pub probability: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ModelVariant {
    #[default]
    HrOnly,
    HrTemperature,
}

/// Parameter set chosen at construction; `predict` never changes it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskModel {
    variant: ModelVariant,
    weight_hr: f64,
    weight_temp: f64,
    bias: f64,
}

impl RiskModel {
    pub fn new(variant: ModelVariant) -> Self {
        match variant {
            ModelVariant::HrOnly => RiskModel {
                variant,
                weight_hr: HR_ONLY_WEIGHT_HR,
                weight_temp: 0.0,
                bias: HR_ONLY_BIAS,
            },
            ModelVariant::HrTemperature => RiskModel {
                variant,
                weight_hr: HR_TEMP_WEIGHT_HR,
                weight_temp: HR_TEMP_WEIGHT_TEMP,
                bias: HR_TEMP_BIAS,
            },
        }
    }

    pub fn hr_only() -> Self {
        RiskModel::new(ModelVariant::HrOnly)
    }

    pub fn hr_temperature() -> Self {
        RiskModel::new(ModelVariant::HrTemperature)
    }

    pub fn variant(&self) -> ModelVariant {
        self.variant
    }

    pub fn predict(&self, features: FeatureVector) -> RiskResult {
        let z = self.weight_hr * features.avg_hr + self.weight_temp * features.temperature + self.bias;

        RiskResult {
            hr: features.avg_hr,
            z,
            probability: sigmoid(z),
        }
    }

    pub fn compute_risk(&self, features: FeatureVector) -> f64 {
        self.predict(features).probability
    }
}

impl Default for RiskModel {
    fn default() -> Self {
        RiskModel::hr_only()
    }
}

/// Logistic function. Branches on the sign so `exp` only ever sees a
/// non-positive argument and cannot overflow.
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigmoid_midpoint_and_bounds() {
        assert_eq!(sigmoid(0.0), 0.5);
        for x in [-1000.0, -50.0, -1.0, 1.0, 50.0, 1000.0] {
            let y = sigmoid(x);
            assert!(y.is_finite());
            assert!((0.0..=1.0).contains(&y), "sigmoid({x}) = {y}");
        }
        assert!(sigmoid(-30.0) > 0.0);
        assert!(sigmoid(30.0) < 1.0);
    }

    #[test]
    fn sigmoid_is_monotonic() {
        let mut previous = sigmoid(-20.0);
        let mut x = -20.0;
        while x < 20.0 {
            x += 0.25;
            let y = sigmoid(x);
            assert!(y > previous, "not increasing at {x}");
            previous = y;
        }
    }

    #[test]
    fn hr_only_at_75_bpm() {
        let result = RiskModel::hr_only().predict(FeatureVector::from_heart_rate(75.0));

        let expected_z: f64 = 0.025592365059655283 * 75.0 - 8.616429237372008;
        let expected_p = 1.0 / (1.0 + (-expected_z).exp());
        assert!((result.z - expected_z).abs() < 1e-9);
        assert!((result.z - (-6.697)).abs() < 1e-4);
        assert!((result.probability - expected_p).abs() < 1e-9);
        assert!((result.probability - 0.00123).abs() < 1e-5);
        assert_eq!(result.hr, 75.0);
    }

    #[test]
    fn hr_only_ignores_temperature() {
        let model = RiskModel::hr_only();
        let cold = model.predict(FeatureVector::new(90.0, 34.0));
        let hot = model.predict(FeatureVector::new(90.0, 40.0));
        assert_eq!(cold, hot);
    }

    #[test]
    fn hr_temperature_variant() {
        let model = RiskModel::hr_temperature();
        assert_eq!(model.variant(), ModelVariant::HrTemperature);

        let result = model.predict(FeatureVector::new(100.0, 37.5));
        let expected_z = 0.13071517041228678 * 100.0 + 2.4987513048592267 * 37.5 - 107.60939401683565;
        assert!((result.z - expected_z).abs() < 1e-9);
        assert!((result.probability - sigmoid(expected_z)).abs() < 1e-12);
    }

    #[test]
    fn compute_risk_matches_predict() {
        let model = RiskModel::default();
        let features = FeatureVector::from_heart_rate(130.0);
        assert_eq!(model.compute_risk(features), model.predict(features).probability);
    }
}
