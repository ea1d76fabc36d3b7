//! Momentum (EMA) target networks
//!
//! A momentum copy shares the architecture of the online network but owns
//! fresh parameter ids and never requires gradients, so no optimizer can see
//! it. After each optimizer step it is pulled towards the online weights:
//! `target = m * target + (1 - m) * online`.
//!
//! Both operations walk the float parameters of any `Module` in visit order,
//! so they pair up parameters of two modules with the same architecture.

use std::vec::IntoIter;

use burn::module::{Module, ModuleMapper, ModuleVisitor, ParamId};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Flattened, detached float parameters in visit order
struct ParamCollector<B: Backend> {
    tensors: Vec<Tensor<B, 1>>,
}

impl<B: Backend> ModuleVisitor<B> for ParamCollector<B> {
    fn visit_float<const D: usize>(&mut self, _id: ParamId, tensor: &Tensor<B, D>) {
        let num_elements = tensor.shape().num_elements();
        self.tensors
            .push(tensor.clone().detach().reshape([num_elements]));
    }
}

fn collect_params<B: Backend, M: Module<B>>(module: &M) -> IntoIter<Tensor<B, 1>> {
    let mut collector = ParamCollector {
        tensors: Vec::new(),
    };
    module.visit(&mut collector);
    collector.tensors.into_iter()
}

/// Blends every float parameter with its online counterpart
struct EmaMapper<B: Backend> {
    online: IntoIter<Tensor<B, 1>>,
    momentum: f64,
}

impl<B: Backend> ModuleMapper<B> for EmaMapper<B> {
    fn map_float<const D: usize>(&mut self, _id: ParamId, tensor: Tensor<B, D>) -> Tensor<B, D> {
        let Some(online) = self.online.next() else {
            return tensor;
        };
        let online = online.reshape::<D, _>(tensor.shape());

        (tensor.mul_scalar(self.momentum) + online.mul_scalar(1.0 - self.momentum)).detach()
    }
}

/// Load the values of `online` into `fresh`, detached and gradient-free
///
/// `fresh` must have the same architecture as `online`; it keeps its own
/// parameter ids.
pub fn momentum_copy<B: Backend, M: Module<B>>(online: &M, fresh: M) -> M {
    ema_update(fresh, online, 0.0)
}

/// Move every parameter of `target` towards `online` by `1 - momentum`
pub fn ema_update<B: Backend, M: Module<B>>(target: M, online: &M, momentum: f64) -> M {
    let mut mapper = EmaMapper {
        online: collect_params(online),
        momentum,
    };
    target.map(&mut mapper)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::networks::{ContrastiveNetworks, NetworkConfig};
    use burn::backend::{Autodiff, NdArray};
    use burn::optim::GradientsParams;
    use burn::tensor::Distribution;

    type TestBackend = Autodiff<NdArray<f32>>;

    fn networks() -> ContrastiveNetworks<TestBackend> {
        NetworkConfig::new()
            .with_width(4)
            .init_contrastive(&Default::default())
    }

    fn target_of(online: &ContrastiveNetworks<TestBackend>) -> ContrastiveNetworks<TestBackend> {
        momentum_copy(online, networks())
    }

    fn max_abs_diff<const D: usize>(a: Tensor<TestBackend, D>, b: Tensor<TestBackend, D>) -> f32 {
        (a - b).abs().max().into_scalar()
    }

    #[test]
    fn test_copy_has_fresh_ids_and_same_values() {
        let online = networks();
        let target = target_of(&online);

        assert_ne!(target.projection_head.fc1.weight.id, online.projection_head.fc1.weight.id);
        assert_ne!(target.encoder.conv1.weight.id, online.encoder.conv1.weight.id);
        assert_eq!(
            max_abs_diff(
                target.projection_head.fc1.weight.val(),
                online.projection_head.fc1.weight.val()
            ),
            0.0
        );
    }

    #[test]
    fn test_target_receives_no_gradients() {
        let device = Default::default();
        let online = networks();
        let target = target_of(&online);

        let images = Tensor::<TestBackend, 4>::random([2, 3, 96, 96], Distribution::Default, &device);
        let (_, projections) = online.forward(images.clone());
        let (_, target_projections) = target.forward(images);
        let loss = (projections - target_projections).powf_scalar(2.0).mean();
        let grads = loss.backward();

        let target_grads = GradientsParams::from_grads(grads, &target);
        assert!(target_grads.is_empty());
    }

    #[test]
    fn test_ema_moves_towards_online() {
        let online = networks();
        let target = target_of(&online);

        // shift the online weights so the two copies disagree
        let mut shifted = online.clone();
        shifted.projection_head.fc2.weight = shifted
            .projection_head
            .fc2
            .weight
            .map(|w| w.add_scalar(1.0));

        let before = target.projection_head.fc2.weight.val();
        let updated = ema_update(target, &shifted, 0.9);

        // 0.9 * w + 0.1 * (w + 1) = w + 0.1
        let after = updated.projection_head.fc2.weight.val();
        assert!(max_abs_diff(after, before.add_scalar(0.1)) < 1e-5);

        // unchanged layers stay put
        let conv = updated.encoder.conv1.weight.val();
        assert!(max_abs_diff(conv, online.encoder.conv1.weight.val()) < 1e-6);
        assert_eq!(updated.num_params(), online.num_params());
    }

    #[test]
    fn test_copy_works_for_any_module() {
        let device = Default::default();
        let config = NetworkConfig::new().with_width(4);
        let online = config.init_probe::<TestBackend>(&device);
        let target = momentum_copy(&online, config.init_probe::<TestBackend>(&device));

        assert_ne!(target.fc.weight.id, online.fc.weight.id);
        let updated = ema_update(target, &online, 0.5);
        assert!(max_abs_diff(updated.fc.weight.val(), online.fc.weight.val()) < 1e-6);
    }
}
