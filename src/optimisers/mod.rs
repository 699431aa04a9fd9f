use std::cell::RefCell;

use argmin::core::{CostFunction, Executor, IterState, State};
use argmin::solver::brent::BrentOpt;
use argmin::solver::neldermead::NelderMead;
use log::{debug, info};

use crate::config::MeanFieldConfig;
use crate::handler::{BayesNetHandler, ParameterSet};
use crate::mean_field::MeanField;
use crate::sequences::WeightedSample;
use crate::Result;

/// Weighted sum of mean-field scores of a sample set as a function of one parameter set of
/// the handler.
///
/// Every sample keeps its own session, so the distributions found in the last evaluation
/// are where the next one starts. Without reoptimisation the distributions stay fixed and
/// only the model changes.
pub struct FreeEnergyCost<'a> {
    handler: &'a mut BayesNetHandler,
    samples: &'a [WeightedSample],
    parameters: ParameterSet,
    sessions: Vec<MeanField>,
    reoptimise: bool,
}

impl<'a> FreeEnergyCost<'a> {
    /// Runs the mean-field iteration once for every sample.
    pub fn new(
        handler: &'a mut BayesNetHandler,
        samples: &'a [WeightedSample],
        parameters: ParameterSet,
        config: MeanFieldConfig,
    ) -> Result<Self> {
        let mut sessions = Vec::with_capacity(samples.len());
        for sample in samples {
            let mut session = MeanField::new(config);
            session.init_observation(handler, &sample.sequence)?;
            session.optimise_by_normalisation(handler)?;
            sessions.push(session);
        }
        Ok(FreeEnergyCost {
            handler,
            samples,
            parameters,
            sessions,
            reoptimise: true,
        })
    }

    pub fn with_reoptimisation(mut self, reoptimise: bool) -> Self {
        self.reoptimise = reoptimise;
        self
    }

    pub fn handler(&self) -> &BayesNetHandler {
        &*self.handler
    }

    pub fn parameter_set(&self) -> ParameterSet {
        self.parameters
    }

    pub fn parameters(&self) -> Result<Vec<f64>> {
        self.handler.get_parameters(self.parameters)
    }

    /// Installs `values` and returns `sum_u w_u * score_u`.
    pub fn evaluate(&mut self, values: &[f64]) -> Result<f64> {
        self.handler.set_parameters(self.parameters, values)?;
        let mut total = 0.0;
        for (sample, session) in self.samples.iter().zip(self.sessions.iter_mut()) {
            let q = session.state().to_vec();
            session.init_observation(self.handler, &sample.sequence)?;
            session.set_state(&q)?;
            if self.reoptimise {
                session.optimise_by_normalisation(self.handler)?;
            }
            total += sample.weight * session.score(self.handler)?;
        }
        Ok(total)
    }
}

struct MultiParamObjective<'c, 'a> {
    cost: RefCell<&'c mut FreeEnergyCost<'a>>,
}

impl CostFunction for MultiParamObjective<'_, '_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, values: &Vec<f64>) -> Result<f64> {
        Ok(-self.cost.borrow_mut().evaluate(values)?)
    }
}

struct SingleParamObjective<'c, 'a> {
    cost: RefCell<&'c mut FreeEnergyCost<'a>>,
}

impl CostFunction for SingleParamObjective<'_, '_> {
    type Param = f64;
    type Output = f64;

    fn cost(&self, value: &f64) -> Result<f64> {
        Ok(-self.cost.borrow_mut().evaluate(&[*value])?)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParameterOptimisationResult {
    pub initial_score: f64,
    pub final_score: f64,
    pub iterations: u64,
    pub parameters: Vec<f64>,
}

/// Maximises a [`FreeEnergyCost`] with Brent's method for a single parameter and the
/// Nelder-Mead simplex otherwise. The best parameters found are left installed.
pub struct ParameterOptimiser<'c, 'a> {
    pub(crate) max_iters: u64,
    pub(crate) step: f64,
    pub(crate) sd_tolerance: f64,
    cost: &'c mut FreeEnergyCost<'a>,
}

impl<'c, 'a> ParameterOptimiser<'c, 'a> {
    pub fn new(cost: &'c mut FreeEnergyCost<'a>) -> Self {
        ParameterOptimiser {
            max_iters: 200,
            step: 0.5,
            sd_tolerance: 1e-6,
            cost,
        }
    }

    pub fn with_max_iters(mut self, max_iters: u64) -> Self {
        self.max_iters = max_iters;
        self
    }

    pub fn run(mut self) -> Result<ParameterOptimisationResult> {
        let start = self.cost.parameters()?;
        let initial_score = self.cost.evaluate(&start)?;
        info!(
            "Optimising {} {} starting from score {}.",
            start.len(),
            self.cost.parameter_set(),
            initial_score
        );
        if start.is_empty() {
            return Ok(ParameterOptimisationResult {
                initial_score,
                final_score: initial_score,
                iterations: 0,
                parameters: start,
            });
        }

        let (best, best_cost, iterations) = if start.len() == 1 {
            self.run_brent(start[0])?
        } else {
            self.run_nelder_mead(&start)?
        };
        let (parameters, final_score) = match best {
            Some(best) if -best_cost >= initial_score => {
                let score = self.cost.evaluate(&best)?;
                (best, score)
            }
            _ => {
                debug!("No improvement found, restoring the starting parameters.");
                let score = self.cost.evaluate(&start)?;
                (start, score)
            }
        };
        info!(
            "Final score {} after {} iteration(s).",
            final_score, iterations
        );
        Ok(ParameterOptimisationResult {
            initial_score,
            final_score,
            iterations,
            parameters,
        })
    }

    fn run_brent(&mut self, start: f64) -> Result<(Option<Vec<f64>>, f64, u64)> {
        let objective = SingleParamObjective {
            cost: RefCell::new(&mut *self.cost),
        };
        let brent = BrentOpt::new(start - 5.0, start + 5.0);
        let max_iters = self.max_iters;
        let res = Executor::new(objective, brent)
            .configure(|_| IterState::new().param(start).max_iters(max_iters))
            .run()?;
        let state = res.state();
        Ok((state.best_param.map(|p| vec![p]), state.best_cost, state.iter))
    }

    fn run_nelder_mead(&mut self, start: &[f64]) -> Result<(Option<Vec<f64>>, f64, u64)> {
        let mut simplex = vec![start.to_vec()];
        for i in 0..start.len() {
            let mut vertex = start.to_vec();
            vertex[i] += self.step;
            simplex.push(vertex);
        }
        let objective = MultiParamObjective {
            cost: RefCell::new(&mut *self.cost),
        };
        let solver = NelderMead::new(simplex).with_sd_tolerance(self.sd_tolerance)?;
        let max_iters = self.max_iters;
        let res = Executor::new(objective, solver)
            .configure(|state| state.max_iters(max_iters))
            .run()?;
        let state = res.state();
        Ok((state.best_param.clone(), state.best_cost, state.iter))
    }
}

#[cfg(test)]
mod tests;
