//! Linear model techniques

use super::{Algorithm, AlgorithmFactory, ParamReader, Parameters, Predictor, RuntimeContext};
use crate::error::{KolosalError, Result};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Solve symmetric positive-definite system Ax = b using Cholesky decomposition.
/// Adds a small ridge and retries once if the matrix is not positive definite.
fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    cholesky_solve_inner(a, b).or_else(|| {
        let n = a.nrows();
        let ridge = 1e-8 * a.diag().iter().map(|v| v.abs()).sum::<f64>() / n.max(1) as f64;
        let mut a_reg = a.clone();
        for k in 0..n {
            a_reg[[k, k]] += ridge.max(1e-12);
        }
        cholesky_solve_inner(&a_reg, b)
    })
}

fn cholesky_solve_inner(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    if n != a.ncols() || n != b.len() {
        return None;
    }

    // A = L * L^T
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let sum: f64 = (0..j).map(|k| l[[i, k]] * l[[j, k]]).sum();
            if i == j {
                let diag = a[[i, i]] - sum;
                if diag <= 0.0 {
                    return None;
                }
                l[[i, j]] = diag.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }

    // L * y = b
    let mut y = Array1::<f64>::zeros(n);
    for i in 0..n {
        let sum: f64 = (0..i).map(|j| l[[i, j]] * y[j]).sum();
        y[i] = (b[i] - sum) / l[[i, i]];
    }

    // L^T * x = y
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let sum: f64 = ((i + 1)..n).map(|j| l[[j, i]] * x[j]).sum();
        x[i] = (y[i] - sum) / l[[i, i]];
    }

    Some(x)
}

fn check_lengths(x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
    if x.nrows() != y.len() {
        return Err(KolosalError::ShapeError {
            expected: format!("y length = {}", x.nrows()),
            actual: format!("y length = {}", y.len()),
        });
    }
    Ok(())
}

/// Ordinary least squares, optionally ridge-regularized
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearRegression {
    pub coefficients: Option<Array1<f64>>,
    pub intercept: Option<f64>,
    pub fit_intercept: bool,
    /// L2 regularization strength
    pub alpha: f64,
}

impl Default for LinearRegression {
    fn default() -> Self {
        Self::new()
    }
}

impl LinearRegression {
    pub fn new() -> Self {
        Self {
            coefficients: None,
            intercept: None,
            fit_intercept: true,
            alpha: 0.0,
        }
    }

    pub fn with_fit_intercept(mut self, fit_intercept: bool) -> Self {
        self.fit_intercept = fit_intercept;
        self
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }
}

impl Predictor for LinearRegression {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        check_lengths(x, y)?;
        let n_features = x.ncols();

        let (x_centered, y_centered, x_mean, y_mean) = if self.fit_intercept {
            let x_mean = x
                .mean_axis(Axis(0))
                .unwrap_or_else(|| Array1::zeros(n_features));
            let y_mean = y.mean().unwrap_or(0.0);
            let x_centered = x - &x_mean.clone().insert_axis(Axis(0));
            let y_centered = y - y_mean;
            (x_centered, y_centered, x_mean, y_mean)
        } else {
            (x.clone(), y.clone(), Array1::zeros(n_features), 0.0)
        };

        // (X^T X + alpha*I) w = X^T y
        let mut xtx = x_centered.t().dot(&x_centered);
        for i in 0..n_features {
            xtx[[i, i]] += self.alpha;
        }
        let xty = x_centered.t().dot(&y_centered);

        let coefficients = cholesky_solve(&xtx, &xty).ok_or_else(|| {
            KolosalError::DataError("singular design matrix, cannot solve least squares".to_string())
        })?;

        self.intercept = Some(y_mean - coefficients.dot(&x_mean));
        self.coefficients = Some(coefficients);
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let coefficients = self.coefficients.as_ref().ok_or(KolosalError::ModelNotFitted)?;
        Ok(x.dot(coefficients) + self.intercept.unwrap_or(0.0))
    }
}

/// Logistic regression for binary classification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRegression {
    pub coefficients: Option<Array1<f64>>,
    pub intercept: Option<f64>,
    /// L2 regularization strength
    pub alpha: f64,
    pub max_iter: usize,
    /// Convergence tolerance on the gradient norm
    pub tol: f64,
    pub learning_rate: f64,
    /// Weight applied to positive samples in the loss
    pub scale_pos_weight: f64,
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self::new()
    }
}

impl LogisticRegression {
    pub fn new() -> Self {
        Self {
            coefficients: None,
            intercept: None,
            alpha: 0.01,
            max_iter: 1000,
            tol: 1e-6,
            learning_rate: 0.1,
            scale_pos_weight: 1.0,
        }
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    pub fn with_scale_pos_weight(mut self, weight: f64) -> Self {
        self.scale_pos_weight = weight;
        self
    }

    fn sigmoid(z: &Array1<f64>) -> Array1<f64> {
        z.mapv(|v| 1.0 / (1.0 + (-v).exp()))
    }

    fn probabilities(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let coefficients = self.coefficients.as_ref().ok_or(KolosalError::ModelNotFitted)?;
        let linear = x.dot(coefficients) + self.intercept.unwrap_or(0.0);
        Ok(Self::sigmoid(&linear))
    }
}

impl Predictor for LogisticRegression {
    /// Weighted gradient descent on the log loss
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        check_lengths(x, y)?;
        let n_features = x.ncols();

        let sample_weights = y.mapv(|v| if v >= 0.5 { self.scale_pos_weight } else { 1.0 });
        let total_weight = sample_weights.sum().max(f64::EPSILON);

        let mut weights = Array1::<f64>::zeros(n_features);
        let mut bias = 0.0;

        for _ in 0..self.max_iter {
            let predictions = Self::sigmoid(&(x.dot(&weights) + bias));
            let errors = (&predictions - y) * &sample_weights;
            let dw = x.t().dot(&errors) / total_weight + self.alpha * &weights;
            let db = errors.sum() / total_weight;

            let grad_norm = (dw.mapv(|v| v * v).sum() + db * db).sqrt();
            if grad_norm < self.tol {
                break;
            }

            weights = weights - self.learning_rate * dw;
            bias -= self.learning_rate * db;
        }

        self.coefficients = Some(weights);
        self.intercept = Some(bias);
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let proba = self.probabilities(x)?;
        Ok(proba.mapv(|p| if p >= 0.5 { 1.0 } else { 0.0 }))
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Option<Array1<f64>>> {
        self.probabilities(x).map(Some)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LogisticRegressionFactory;

impl AlgorithmFactory for LogisticRegressionFactory {
    fn name(&self) -> &str {
        "logit"
    }

    fn defaults(&self) -> Parameters {
        Parameters::from([
            ("alpha".to_string(), Value::from(0.01)),
            ("max_iter".to_string(), Value::from(1000u64)),
            ("tol".to_string(), Value::from(1e-6)),
            ("learning_rate".to_string(), Value::from(0.1)),
            ("scale_pos_weight".to_string(), Value::from(1.0)),
        ])
    }

    /// Reweights the positive class by the label imbalance of the run
    fn runtime_parameters(&self, context: &RuntimeContext) -> Parameters {
        match context.class_imbalance_ratio {
            Some(ratio) if ratio > 0.0 => {
                Parameters::from([("scale_pos_weight".to_string(), Value::from(ratio))])
            }
            _ => Parameters::new(),
        }
    }

    fn build(&self, parameters: &Parameters) -> Result<Algorithm> {
        let reader = ParamReader::new(
            self.name(),
            parameters,
            &["alpha", "max_iter", "tol", "learning_rate", "scale_pos_weight"],
        )?;
        let learning_rate = reader.f64("learning_rate", 0.1)?;
        if learning_rate <= 0.0 {
            return Err(KolosalError::invalid_parameter(
                "learning_rate",
                learning_rate,
                "must be positive",
            ));
        }

        let model = LogisticRegression::new()
            .with_alpha(reader.f64("alpha", 0.01)?)
            .with_max_iter(reader.usize("max_iter", 1000)?)
            .with_tol(reader.f64("tol", 1e-6)?)
            .with_learning_rate(learning_rate)
            .with_scale_pos_weight(reader.f64("scale_pos_weight", 1.0)?);
        Ok(Algorithm::Predictor(Box::new(model)))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LinearRegressionFactory;

impl AlgorithmFactory for LinearRegressionFactory {
    fn name(&self) -> &str {
        "ols"
    }

    fn defaults(&self) -> Parameters {
        Parameters::from([
            ("alpha".to_string(), Value::from(0.0)),
            ("fit_intercept".to_string(), Value::from(true)),
        ])
    }

    fn build(&self, parameters: &Parameters) -> Result<Algorithm> {
        let reader = ParamReader::new(self.name(), parameters, &["alpha", "fit_intercept"])?;
        let alpha = reader.f64("alpha", 0.0)?;
        if alpha < 0.0 {
            return Err(KolosalError::invalid_parameter("alpha", alpha, "must be >= 0"));
        }
        let model = LinearRegression::new()
            .with_alpha(alpha)
            .with_fit_intercept(reader.bool("fit_intercept", true)?);
        Ok(Algorithm::Predictor(Box::new(model)))
    }
}

/// Symbols exported to the technique loader
pub fn symbols() -> Vec<(&'static str, Arc<dyn AlgorithmFactory>)> {
    vec![
        ("LogisticRegression", Arc::new(LogisticRegressionFactory)),
        ("LinearRegression", Arc::new(LinearRegressionFactory)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_linear_regression_simple() {
        let x = array![[1.0], [2.0], [3.0], [4.0], [5.0]];
        let y = array![3.0, 5.0, 7.0, 9.0, 11.0];

        let mut model = LinearRegression::new();
        model.fit(&x, &y).unwrap();

        let coef = model.coefficients.as_ref().unwrap();
        assert!((coef[0] - 2.0).abs() < 1e-8);
        assert!((model.intercept.unwrap() - 1.0).abs() < 1e-8);
    }

    #[test]
    fn test_logistic_regression_separable() {
        let x = array![[0.0], [0.5], [1.0], [4.0], [4.5], [5.0]];
        let y = array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0];

        let mut model = LogisticRegression::new().with_alpha(0.0);
        model.fit(&x, &y).unwrap();
        let pred = model.predict(&x).unwrap();
        assert_eq!(pred, y);

        let proba = model.predict_proba(&x).unwrap().unwrap();
        assert!(proba[0] < 0.5 && proba[5] > 0.5);
    }

    #[test]
    fn test_predict_before_fit() {
        let model = LogisticRegression::new();
        assert!(matches!(
            model.predict(&array![[1.0]]),
            Err(KolosalError::ModelNotFitted)
        ));
    }

    #[test]
    fn test_runtime_scale_pos_weight() {
        let context = RuntimeContext {
            class_imbalance_ratio: Some(3.0),
            ..RuntimeContext::default()
        };
        let params = LogisticRegressionFactory.runtime_parameters(&context);
        assert_eq!(params.get("scale_pos_weight"), Some(&Value::from(3.0)));
    }
}
