//! Scoped capture of one layer's activation and gradient

use ndarray::{Array4, ArrayD};
use parking_lot::MutexGuard;

use crate::error::ExplainError;
use crate::model::vision::{ClassSelection, NativeNetwork, Probe};

/// Holds the network's probe for the duration of one explanation.
///
/// While alive, no other explanation of the same network can run. Dropping
/// the context detaches the target and frees captured tensors, whichever way
/// the explanation ended.
pub struct ExplanationContext<'a> {
    network: &'a NativeNetwork,
    layer: usize,
    probe: MutexGuard<'a, Probe>,
}

impl<'a> ExplanationContext<'a> {
    pub fn attach(network: &'a NativeNetwork, layer: usize) -> Result<Self, ExplainError> {
        if layer >= network.len() {
            return Err(ExplainError::NoSuchLayer(layer));
        }
        let mut probe = network.probe.lock();
        probe.clear();
        probe.target = Some(layer);
        Ok(Self {
            network,
            layer,
            probe,
        })
    }

    pub fn layer(&self) -> usize {
        self.layer
    }

    /// Forward and backward pass; returns the selection plus the captured
    /// activation and gradient of the attached layer.
    pub fn run(
        &mut self,
        input: &Array4<f32>,
        class_index: Option<usize>,
    ) -> Result<(ClassSelection, ArrayD<f32>, ArrayD<f32>), ExplainError> {
        let (logits, tape) = self.network.forward_traced(input, Some(&mut *self.probe))?;
        let first = logits.outer_iter().next().ok_or(ExplainError::EmptyOutput)?;
        let selection = ClassSelection::from_logits(first, class_index)?;

        let seed = selection.seed_matrix(logits.nrows()).into_dyn();
        self.network.backward(&tape, seed, Some(&mut *self.probe))?;

        let activation = self.probe.activation.take().ok_or(ExplainError::NotCaptured)?;
        let gradient = self.probe.gradient.take().ok_or(ExplainError::NotCaptured)?;
        Ok((selection, activation, gradient))
    }
}

impl Drop for ExplanationContext<'_> {
    fn drop(&mut self) {
        self.probe.clear();
    }
}
