use crate::{
    config::SparseNetConfig,
    dictionary::Dictionary,
    error::{Result, SparseNetError},
    expander::Expander,
    ista::{IstaReport, IstaSolver},
    reconstruction::{ParameterGrads, Reconstruction},
};
use ndarray::{Array2, Array4, ArrayView2, ArrayView4};
use rand::{rngs::StdRng, SeedableRng};

/// Sparse-coding model: a unit-column dictionary behind a transposed-convolution
/// expander, with ISTA inference of the codes.
///
/// The dictionary columns are normalized once at construction. After every
/// outer-loop update of the parameters the caller must call
/// [`SparseNet::normalize_weights`]; inference assumes unit-norm columns but
/// does not enforce them.
#[derive(Debug, Clone)]
pub struct SparseNet {
    config: SparseNetConfig,
    dictionary: Dictionary,
    expander: Expander,
    last_report: Option<IstaReport>,
}

impl SparseNet {
    pub fn new(config: SparseNetConfig, seed: [u8; 32]) -> Result<Self> {
        config.validate()?;
        let mut rng = StdRng::from_seed(seed);
        let mut dictionary = Dictionary::new(config.feature_len(), config.patch_len(), &mut rng)?;
        dictionary.normalize();
        let expander = Expander::new(
            config.num_channels,
            config.kernel_size,
            config.stride,
            &mut rng,
        )?;
        Ok(Self {
            config,
            dictionary,
            expander,
            last_report: None,
        })
    }

    /// Builds a model around existing parameters. The dictionary is used as given.
    pub fn from_parts(
        config: SparseNetConfig,
        dictionary: Dictionary,
        expander: Expander,
    ) -> Result<Self> {
        config.validate()?;
        let feature_len = expander.output_width(config.code_size).pow(2);
        for (what, expected, actual) in [
            ("dictionary input features", feature_len, dictionary.in_features()),
            ("dictionary output features", config.patch_len(), dictionary.out_features()),
            ("expander channels", config.num_channels, expander.num_channels()),
            ("expander kernel size", config.kernel_size, expander.kernel_size()),
            ("expander stride", config.stride, expander.stride()),
        ] {
            if expected != actual {
                return Err(SparseNetError::ShapeMismatch {
                    what,
                    expected,
                    actual,
                });
            }
        }
        Ok(Self {
            config,
            dictionary,
            expander,
            last_report: None,
        })
    }

    pub fn config(&self) -> &SparseNetConfig {
        &self.config
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.dictionary
    }

    /// Outer-loop access to the dictionary. Call [`SparseNet::normalize_weights`] after updating it.
    pub fn dictionary_mut(&mut self) -> &mut Dictionary {
        &mut self.dictionary
    }

    pub fn expander(&self) -> &Expander {
        &self.expander
    }

    pub fn expander_mut(&mut self) -> &mut Expander {
        &mut self.expander
    }

    pub fn normalize_weights(&mut self) {
        self.dictionary.normalize();
    }

    pub fn reconstruction(&self) -> Reconstruction<'_> {
        Reconstruction::new(&self.dictionary, &self.expander, self.config.code_size)
    }

    pub fn predict(&self, codes: &ArrayView4<f32>) -> Result<Array2<f32>> {
        self.reconstruction().predict(codes)
    }

    /// Runs ISTA on `targets` (`[N, M * M]`) and keeps the report for later queries.
    pub fn solve(&mut self, targets: &ArrayView2<f32>) -> Result<&IstaReport> {
        self.last_report = None;
        let solver = IstaSolver::from_config(&self.config);
        let report = solver.solve(&self.reconstruction(), targets)?;
        let report: &IstaReport = self.last_report.insert(report);
        Ok(report)
    }

    /// Infers sparse codes for `targets` and returns the reconstruction at the converged codes.
    pub fn infer_and_reconstruct(&mut self, targets: &ArrayView2<f32>) -> Result<Array2<f32>> {
        self.solve(targets)?;
        let codes = self.last_codes().ok_or(SparseNetError::MissingCodes)?;
        self.predict(&codes.view())
    }

    /// Mean smooth loss over the iterations of the most recent solve.
    pub fn average_inner_loss(&self) -> f32 {
        self.last_report
            .as_ref()
            .map_or(0.0, |report| report.average_loss())
    }

    pub fn last_report(&self) -> Option<&IstaReport> {
        self.last_report.as_ref()
    }

    pub fn last_codes(&self) -> Option<&Array4<f32>> {
        self.last_report.as_ref().map(|report| &report.codes)
    }

    /// Gradients of an outer loss w.r.t. the parameters, at the codes of the most
    /// recent inference. `grad_prediction` is the outer loss gradient w.r.t. the
    /// returned prediction.
    pub fn backward(&self, grad_prediction: &ArrayView2<f32>) -> Result<ParameterGrads> {
        let codes = self.last_codes().ok_or(SparseNetError::MissingCodes)?;
        self.reconstruction().parameter_grads(&codes.view(), grad_prediction)
    }
}
