//! Network Architectures
//!
//! The three sub-models of a contrastive run:
//!
//! - **Encoder**: four strided 3x3 convolutions (valid padding) with ReLU,
//!   flattened into a `width`-dimensional ReLU feature layer
//! - **Projection head**: `Linear + ReLU, Linear`, maps features to the space
//!   the contrastive losses compare
//! - **Linear probe**: a single `Linear` classifier on top of frozen features
//!
//! Spatially a 96x96 input shrinks 96 -> 47 -> 23 -> 11 -> 5.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

/// Shape parameters shared by the three networks
#[derive(Config, Debug)]
pub struct NetworkConfig {
    /// Channels of every convolution and size of every dense layer
    #[config(default = "128")]
    pub width: usize,

    /// Input image size (assumes square images)
    #[config(default = "96")]
    pub input_size: usize,

    /// Number of input channels (3 for RGB)
    #[config(default = "3")]
    pub in_channels: usize,

    /// Number of classes seen by the linear probe
    #[config(default = "10")]
    pub num_classes: usize,
}

impl NetworkConfig {
    /// Number of strided convolutions in the encoder
    pub const CONV_LAYERS: usize = 4;

    /// Spatial size after the convolution stack
    pub fn feature_map_size(&self) -> usize {
        (0..Self::CONV_LAYERS).fold(self.input_size, |size, _| conv_output_size(size))
    }

    /// Length of the flattened convolution output
    pub fn flattened_size(&self) -> usize {
        let size = self.feature_map_size();
        self.width * size * size
    }

    pub fn init_encoder<B: Backend>(&self, device: &B::Device) -> Encoder<B> {
        let conv = |in_channels: usize| {
            Conv2dConfig::new([in_channels, self.width], [3, 3])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Valid)
                .init(device)
        };

        Encoder {
            conv1: conv(self.in_channels),
            conv2: conv(self.width),
            conv3: conv(self.width),
            conv4: conv(self.width),
            fc: LinearConfig::new(self.flattened_size(), self.width).init(device),
            relu: Relu::new(),
        }
    }

    pub fn init_projection_head<B: Backend>(&self, device: &B::Device) -> ProjectionHead<B> {
        ProjectionHead {
            fc1: LinearConfig::new(self.width, self.width).init(device),
            fc2: LinearConfig::new(self.width, self.width).init(device),
            relu: Relu::new(),
        }
    }

    pub fn init_probe<B: Backend>(&self, device: &B::Device) -> LinearProbe<B> {
        LinearProbe {
            fc: LinearConfig::new(self.width, self.num_classes).init(device),
        }
    }

    /// Encoder and projection head, the parameters of the representation optimizer
    pub fn init_contrastive<B: Backend>(&self, device: &B::Device) -> ContrastiveNetworks<B> {
        ContrastiveNetworks {
            encoder: self.init_encoder(device),
            projection_head: self.init_projection_head(device),
        }
    }
}

/// 3x3 kernel, stride 2, no padding
fn conv_output_size(size: usize) -> usize {
    size.saturating_sub(3) / 2 + 1
}

/// Convolutional encoder producing `width`-dimensional features
#[derive(Module, Debug)]
pub struct Encoder<B: Backend> {
    pub conv1: Conv2d<B>,
    pub conv2: Conv2d<B>,
    pub conv3: Conv2d<B>,
    pub conv4: Conv2d<B>,
    pub fc: Linear<B>,
    pub relu: Relu,
}

impl<B: Backend> Encoder<B> {
    /// Forward pass through the network
    ///
    /// # Arguments
    /// * `x` - Input tensor of shape [batch_size, 3, 96, 96]
    ///
    /// # Returns
    /// * Feature tensor of shape [batch_size, width]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.relu.forward(self.conv1.forward(x));
        let x = self.relu.forward(self.conv2.forward(x));
        let x = self.relu.forward(self.conv3.forward(x));
        let x = self.relu.forward(self.conv4.forward(x));

        let [batch_size, channels, height, width] = x.dims();
        let x = x.reshape([batch_size, channels * height * width]);

        self.relu.forward(self.fc.forward(x))
    }
}

/// Two-layer MLP on top of the encoder
#[derive(Module, Debug)]
pub struct ProjectionHead<B: Backend> {
    pub fc1: Linear<B>,
    pub fc2: Linear<B>,
    pub relu: Relu,
}

impl<B: Backend> ProjectionHead<B> {
    pub fn forward(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.relu.forward(self.fc1.forward(features));
        self.fc2.forward(x)
    }
}

/// Linear classifier evaluating the learned representation
#[derive(Module, Debug)]
pub struct LinearProbe<B: Backend> {
    pub fc: Linear<B>,
}

impl<B: Backend> LinearProbe<B> {
    /// Class logits `[batch_size, num_classes]`
    pub fn forward(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        self.fc.forward(features)
    }
}

/// The representation path: encoder followed by projection head
#[derive(Module, Debug)]
pub struct ContrastiveNetworks<B: Backend> {
    pub encoder: Encoder<B>,
    pub projection_head: ProjectionHead<B>,
}

impl<B: Backend> ContrastiveNetworks<B> {
    /// Returns `(features, projections)`
    pub fn forward(&self, images: Tensor<B, 4>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let features = self.encoder.forward(images);
        let projections = self.projection_head.forward(features.clone());
        (features, projections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_feature_map_size() {
        let config = NetworkConfig::new();
        assert_eq!(config.feature_map_size(), 5);
        assert_eq!(config.flattened_size(), 128 * 25);
    }

    #[test]
    fn test_forward_shapes() {
        let device = Default::default();
        let config = NetworkConfig::new().with_width(8);
        let networks = config.init_contrastive::<TestBackend>(&device);
        let probe = config.init_probe::<TestBackend>(&device);

        let images = Tensor::<TestBackend, 4>::random([2, 3, 96, 96], Distribution::Default, &device);
        let (features, projections) = networks.forward(images);

        assert_eq!(features.dims(), [2, 8]);
        assert_eq!(projections.dims(), [2, 8]);
        assert_eq!(probe.forward(features).dims(), [2, 10]);
    }

    #[test]
    fn test_features_are_non_negative() {
        let device = Default::default();
        let encoder = NetworkConfig::new()
            .with_width(4)
            .init_encoder::<TestBackend>(&device);

        let images = Tensor::<TestBackend, 4>::random([1, 3, 96, 96], Distribution::Default, &device);
        let min: f32 = encoder.forward(images).min().into_scalar();
        assert!(min >= 0.0);
    }
}
