//! # bayesdb-gauss
//!
//! An independent diagonal-Gaussian backend: every variable is modeled
//! as a univariate normal, fitted in closed form by ANALYZE, with no
//! dependence between variables. Densities, simulation, and entropies
//! are exact, which makes this backend the reference implementation for
//! the engine's end-to-end tests and the template for real backends.

use std::collections::HashMap;
use std::sync::Mutex;

use bayesdb_core::{
    Backend, BackendError, BackendResult, DataSet, InterruptFlag, PopulationView, Value, VarId,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const TAU: f64 = 2.0 * core::f64::consts::PI;

/// Variance floor applied after fitting, so degenerate columns keep a
/// proper density.
const MIN_VARIANCE: f64 = 1e-6;

/// Mean and variance of one variable under one model.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Normal {
    mean: f64,
    variance: f64,
}

impl Default for Normal {
    fn default() -> Self {
        // Standard normal until ANALYZE fits the data.
        Self {
            mean: 0.0,
            variance: 1.0,
        }
    }
}

impl Normal {
    fn logpdf(&self, x: f64) -> f64 {
        let d = x - self.mean;
        -0.5 * (TAU * self.variance).ln() - d * d / (2.0 * self.variance)
    }

    /// Differential entropy in bits.
    fn entropy_bits(&self) -> f64 {
        0.5 * (TAU * core::f64::consts::E * self.variance).ln() / core::f64::consts::LN_2
    }
}

#[derive(Debug, Default)]
struct GeneratorState {
    varnos: Vec<VarId>,
    models: HashMap<i64, HashMap<VarId, Normal>>,
    /// Observations retained at ANALYZE time for row similarity.
    data: Option<DataSet>,
}

/// The diagonal-Gaussian backend. Registers as `diag_gauss`.
pub struct DiagGauss {
    state: Mutex<HashMap<i64, GeneratorState>>,
    rng: Mutex<StdRng>,
}

impl Default for DiagGauss {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagGauss {
    /// Creates the backend with a fixed default seed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HashMap::new()),
            rng: Mutex::new(StdRng::seed_from_u64(0)),
        }
    }

    fn err(message: impl Into<String>) -> BackendError {
        BackendError::new("diag_gauss", message)
    }

    fn with_generator<T>(
        &self,
        generator_id: i64,
        f: impl FnOnce(&mut GeneratorState) -> BackendResult<T>,
    ) -> BackendResult<T> {
        let mut state = self.state.lock().expect("state lock");
        let generator = state
            .get_mut(&generator_id)
            .ok_or_else(|| Self::err(format!("Unknown generator {generator_id}")))?;
        f(generator)
    }

    fn model_params(
        generator: &GeneratorState,
        model_id: i64,
    ) -> BackendResult<&HashMap<VarId, Normal>> {
        generator
            .models
            .get(&model_id)
            .ok_or_else(|| Self::err(format!("Unknown model {model_id}")))
    }

    fn param(
        generator: &GeneratorState,
        model_id: i64,
        varno: VarId,
    ) -> BackendResult<Normal> {
        let params = Self::model_params(generator, model_id)?;
        params
            .get(&varno)
            .copied()
            .ok_or_else(|| Self::err(format!("Unknown variable {varno}")))
    }

    /// One standard normal draw (Box–Muller on two uniforms).
    fn standard_normal(rng: &mut StdRng) -> f64 {
        let mut u1: f64 = rng.random();
        while u1 <= f64::MIN_POSITIVE {
            u1 = rng.random();
        }
        let u2: f64 = rng.random();
        (-2.0 * u1.ln()).sqrt() * (TAU * u2).cos()
    }
}

impl Backend for DiagGauss {
    fn name(&self) -> &str {
        "diag_gauss"
    }

    fn create_generator(
        &self,
        generator_id: i64,
        schema: &str,
        population: &PopulationView,
    ) -> BackendResult<()> {
        if !schema.trim().is_empty() {
            return Err(Self::err("diag_gauss takes no schema"));
        }
        for variable in &population.variables {
            match variable.stattype.as_str() {
                "numerical" | "count" | "magnitude" | "cyclic" => {}
                other => {
                    return Err(Self::err(format!(
                        "Variable {} has unsupported statistical type {other}",
                        variable.name
                    )))
                }
            }
        }
        let mut state = self.state.lock().expect("state lock");
        state.insert(
            generator_id,
            GeneratorState {
                varnos: population.variables.iter().map(|v| v.varno).collect(),
                ..GeneratorState::default()
            },
        );
        Ok(())
    }

    fn drop_generator(&self, generator_id: i64) -> BackendResult<()> {
        self.state.lock().expect("state lock").remove(&generator_id);
        Ok(())
    }

    fn initialize_models(&self, generator_id: i64, model_ids: &[i64]) -> BackendResult<()> {
        self.with_generator(generator_id, |generator| {
            let varnos = generator.varnos.clone();
            for &model_id in model_ids {
                let params = varnos.iter().map(|&v| (v, Normal::default())).collect();
                generator.models.insert(model_id, params);
            }
            Ok(())
        })
    }

    fn drop_models(&self, generator_id: i64, model_ids: &[i64]) -> BackendResult<()> {
        self.with_generator(generator_id, |generator| {
            for model_id in model_ids {
                generator.models.remove(model_id);
            }
            Ok(())
        })
    }

    fn analyze_models(
        &self,
        generator_id: i64,
        model_ids: &[i64],
        data: &DataSet,
        _iterations: u64,
        program: Option<&str>,
        interrupt: &InterruptFlag,
    ) -> BackendResult<()> {
        if let Some(program) = program {
            return Err(Self::err(format!(
                "diag_gauss admits no analysis program, got ({program})"
            )));
        }
        self.with_generator(generator_id, |generator| {
            // The fit is closed form: per-variable MLE mean and variance.
            let mut fitted: HashMap<VarId, Normal> = HashMap::new();
            for &varno in &generator.varnos {
                let observed: Vec<f64> = data
                    .column(varno)
                    .map(|column| column.iter().filter_map(|v| v.as_f64()).collect())
                    .unwrap_or_default();
                let normal = if observed.is_empty() {
                    Normal::default()
                } else {
                    let n = observed.len() as f64;
                    let mean = observed.iter().sum::<f64>() / n;
                    let variance = observed
                        .iter()
                        .map(|x| (x - mean) * (x - mean))
                        .sum::<f64>()
                        / n;
                    Normal {
                        mean,
                        variance: variance.max(MIN_VARIANCE),
                    }
                };
                fitted.insert(varno, normal);
            }
            for &model_id in model_ids {
                if interrupt.is_set() {
                    return Err(Self::err("Interrupted"));
                }
                let params = generator
                    .models
                    .get_mut(&model_id)
                    .ok_or_else(|| Self::err(format!("Unknown model {model_id}")))?;
                *params = fitted.clone();
            }
            generator.data = Some(data.clone());
            Ok(())
        })
    }

    fn logpdf_joint(
        &self,
        generator_id: i64,
        model_id: i64,
        targets: &[(VarId, Value)],
        _constraints: &[(VarId, Value)],
    ) -> BackendResult<f64> {
        // Variables are independent, so constraints never move the
        // density and marginalization is just omission.
        self.with_generator(generator_id, |generator| {
            let mut total = 0.0;
            for (varno, value) in targets {
                let normal = Self::param(generator, model_id, *varno)?;
                match value.as_f64() {
                    Some(x) => total += normal.logpdf(x),
                    None => return Ok(f64::NEG_INFINITY),
                }
            }
            Ok(total)
        })
    }

    fn simulate_joint(
        &self,
        generator_id: i64,
        model_ids: &[i64],
        targets: &[VarId],
        constraints: &[(VarId, Value)],
        n_samples: usize,
    ) -> BackendResult<Vec<Vec<Value>>> {
        if model_ids.is_empty() {
            return Err(Self::err("Empty model set"));
        }
        self.with_generator(generator_id, |generator| {
            let mut rng = self.rng.lock().expect("rng lock");
            let mut rows = Vec::with_capacity(n_samples);
            for _ in 0..n_samples {
                // Each draw comes from one uniformly chosen model.
                let model_id = model_ids[rng.random_range(0..model_ids.len())];
                let mut row = Vec::with_capacity(targets.len());
                for varno in targets {
                    if let Some((_, pinned)) =
                        constraints.iter().find(|(v, _)| v == varno)
                    {
                        row.push(pinned.clone());
                        continue;
                    }
                    let normal = Self::param(generator, model_id, *varno)?;
                    let draw =
                        normal.mean + normal.variance.sqrt() * Self::standard_normal(&mut rng);
                    row.push(Value::Real(draw));
                }
                rows.push(row);
            }
            Ok(rows)
        })
    }

    fn column_dependence_probability(
        &self,
        generator_id: i64,
        model_id: i64,
        v0: VarId,
        v1: VarId,
    ) -> BackendResult<f64> {
        self.with_generator(generator_id, |generator| {
            Self::param(generator, model_id, v0)?;
            Self::param(generator, model_id, v1)?;
            // Off-diagonal dependence is identically zero in this model.
            Ok(if v0 == v1 { 1.0 } else { 0.0 })
        })
    }

    fn column_mutual_information(
        &self,
        generator_id: i64,
        model_id: i64,
        v0: VarId,
        v1: VarId,
        _constraints: &[(VarId, Value)],
        _n_samples: usize,
    ) -> BackendResult<f64> {
        self.with_generator(generator_id, |generator| {
            let normal = Self::param(generator, model_id, v0)?;
            Self::param(generator, model_id, v1)?;
            if v0 == v1 {
                // Self-information is the column entropy.
                Ok(normal.entropy_bits().max(0.0))
            } else {
                Ok(0.0)
            }
        })
    }

    fn row_similarity(
        &self,
        generator_id: i64,
        model_id: i64,
        row0: i64,
        row1: i64,
        context: VarId,
    ) -> BackendResult<f64> {
        self.with_generator(generator_id, |generator| {
            let normal = Self::param(generator, model_id, context)?;
            let Some(data) = &generator.data else {
                return Err(Self::err("Models have not been analyzed"));
            };
            let (Some(x0), Some(x1)) = (
                data.cell(row0, context).and_then(Value::as_f64),
                data.cell(row1, context).and_then(Value::as_f64),
            ) else {
                return Ok(0.0);
            };
            let z = (x0 - x1) / normal.variance.sqrt();
            Ok((-0.5 * z * z).exp())
        })
    }

    fn set_seed(&self, seed: u64) {
        *self.rng.lock().expect("rng lock") = StdRng::seed_from_u64(seed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bayesdb_core::VariableView;

    fn view() -> PopulationView {
        PopulationView {
            name: String::from("p"),
            table: String::from("t"),
            variables: vec![
                VariableView {
                    varno: 0,
                    name: String::from("a"),
                    stattype: String::from("numerical"),
                },
                VariableView {
                    varno: 1,
                    name: String::from("b"),
                    stattype: String::from("numerical"),
                },
            ],
        }
    }

    fn data() -> DataSet {
        DataSet {
            rowids: vec![1, 2, 3],
            varnos: vec![0, 1],
            rows: vec![
                vec![Value::Real(1.0), Value::Real(2.0)],
                vec![Value::Real(2.0), Value::Real(4.0)],
                vec![Value::Real(3.0), Value::Real(6.0)],
            ],
        }
    }

    fn fitted() -> DiagGauss {
        let backend = DiagGauss::new();
        backend.create_generator(1, "", &view()).unwrap();
        backend.initialize_models(1, &[0, 1]).unwrap();
        backend
            .analyze_models(1, &[0, 1], &data(), 0, None, &InterruptFlag::new())
            .unwrap();
        backend
    }

    #[test]
    fn test_rejects_nominal_variables() {
        let backend = DiagGauss::new();
        let mut bad = view();
        bad.variables[0].stattype = String::from("nominal");
        assert!(backend.create_generator(1, "", &bad).is_err());
    }

    #[test]
    fn test_rejects_schema_blob() {
        let backend = DiagGauss::new();
        assert!(backend.create_generator(1, "SUBSAMPLE(10)", &view()).is_err());
    }

    #[test]
    fn test_fit_is_mle() {
        let backend = fitted();
        // Column a: mean 2, variance 2/3.
        let expected = Normal {
            mean: 2.0,
            variance: 2.0 / 3.0,
        };
        let log = backend
            .logpdf_joint(1, 0, &[(0, Value::Real(2.0))], &[])
            .unwrap();
        assert!((log - expected.logpdf(2.0)).abs() < 1e-12);
    }

    #[test]
    fn test_unfitted_models_are_standard_normal() {
        let backend = DiagGauss::new();
        backend.create_generator(1, "", &view()).unwrap();
        backend.initialize_models(1, &[0]).unwrap();
        let log = backend
            .logpdf_joint(1, 0, &[(0, Value::Real(0.0))], &[])
            .unwrap();
        assert!((log - Normal::default().logpdf(0.0)).abs() < 1e-12);
    }

    #[test]
    fn test_joint_density_factorizes() {
        let backend = fitted();
        let joint = backend
            .logpdf_joint(1, 0, &[(0, Value::Real(1.5)), (1, Value::Real(3.0))], &[])
            .unwrap();
        let a = backend
            .logpdf_joint(1, 0, &[(0, Value::Real(1.5))], &[])
            .unwrap();
        let b = backend
            .logpdf_joint(1, 0, &[(1, Value::Real(3.0))], &[])
            .unwrap();
        assert!((joint - (a + b)).abs() < 1e-12);
    }

    #[test]
    fn test_null_target_is_impossible() {
        let backend = fitted();
        let log = backend.logpdf_joint(1, 0, &[(0, Value::Null)], &[]).unwrap();
        assert_eq!(log, f64::NEG_INFINITY);
    }

    #[test]
    fn test_simulation_shape_and_determinism() {
        let backend = fitted();
        backend.set_seed(7);
        let first = backend.simulate_joint(1, &[0, 1], &[0, 1], &[], 4).unwrap();
        assert_eq!(first.len(), 4);
        assert!(first.iter().all(|row| row.len() == 2));

        backend.set_seed(7);
        let second = backend.simulate_joint(1, &[0, 1], &[0, 1], &[], 4).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_simulation_respects_constraints() {
        let backend = fitted();
        let rows = backend
            .simulate_joint(1, &[0], &[0, 1], &[(0, Value::Real(9.0))], 3)
            .unwrap();
        assert!(rows.iter().all(|row| row[0] == Value::Real(9.0)));
    }

    #[test]
    fn test_independence_declared() {
        let backend = fitted();
        assert_eq!(
            backend.column_dependence_probability(1, 0, 0, 1).unwrap(),
            0.0
        );
        assert_eq!(
            backend.column_dependence_probability(1, 0, 0, 0).unwrap(),
            1.0
        );
        assert_eq!(
            backend
                .column_mutual_information(1, 0, 0, 1, &[], 10)
                .unwrap(),
            0.0
        );
    }

    #[test]
    fn test_self_information_is_entropy() {
        let backend = fitted();
        let mi = backend
            .column_mutual_information(1, 0, 0, 0, &[], 10)
            .unwrap();
        let expected = Normal {
            mean: 2.0,
            variance: 2.0 / 3.0,
        }
        .entropy_bits();
        assert!((mi - expected).abs() < 1e-12);
        assert!(mi >= 0.0);
    }

    #[test]
    fn test_row_similarity() {
        let backend = fitted();
        let same = backend.row_similarity(1, 0, 1, 1, 0).unwrap();
        assert!((same - 1.0).abs() < 1e-12);
        let near = backend.row_similarity(1, 0, 1, 2, 0).unwrap();
        let far = backend.row_similarity(1, 0, 1, 3, 0).unwrap();
        assert!(near > far);
        assert!(far > 0.0);
    }

    #[test]
    fn test_drop_models_forgets_state() {
        let backend = fitted();
        backend.drop_models(1, &[0]).unwrap();
        assert!(backend
            .logpdf_joint(1, 0, &[(0, Value::Real(0.0))], &[])
            .is_err());
        // Model 1 survives.
        backend
            .logpdf_joint(1, 1, &[(0, Value::Real(0.0))], &[])
            .unwrap();
    }
}
