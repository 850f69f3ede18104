//! Residual networks.
//!
//! The stem is `conv7x7/2 -> relu -> maxpool3x3/2`, followed by four stages of residual blocks
//! and a global-average-pool plus linear head. There is no normalization layer; instead the last
//! convolution of every residual branch starts at zero, so each block is the identity (plus a
//! projection where shapes change) at initialization and deep stacks stay numerically tame.

use super::ImageClassifier;
use crate::nn::{Conv2d, GlobalAvgPool, Linear, MaxPool2d, Module, ParamMut, ParamRef, Relu};
use crate::tensor::{Result, Tensor};
use rand::Rng;

const STAGE_WIDTHS: [usize; 4] = [64, 128, 256, 512];

/// A ResNet Basic Block.
///
/// `conv3x3 -> relu -> conv3x3 -> (+ shortcut) -> relu`
#[derive(Debug, Clone)]
pub struct BasicBlock {
    conv1: Conv2d,
    relu1: Relu,
    conv2: Conv2d,
    downsample: Option<Conv2d>,
    relu_out: Relu,
}

impl BasicBlock {
    pub const EXPANSION: usize = 1;

    pub fn new<R: Rng>(
        in_channels: usize,
        out_channels: usize,
        stride: usize,
        rng: &mut R,
    ) -> Self {
        // The branch's last conv already carries a bias
        let downsample = (stride != 1 || in_channels != out_channels).then(|| {
            Conv2d::new(in_channels, out_channels, 1, stride, 0, rng).without_bias()
        });

        Self {
            conv1: Conv2d::new(in_channels, out_channels, 3, stride, 1, rng),
            relu1: Relu::new(),
            conv2: Conv2d::new(out_channels, out_channels, 3, 1, 1, rng).zero_weights(),
            downsample,
            relu_out: Relu::new(),
        }
    }

    pub fn forward(&mut self, x: &Tensor<f32, 4>) -> Result<Tensor<f32, 4>> {
        let out = self.conv1.forward(x)?;
        let out = self.relu1.forward(&out);
        let mut out = self.conv2.forward(&out)?;

        match &mut self.downsample {
            Some(ds) => out.add_assign(&ds.forward(x)?)?,
            None => out.add_assign(x)?,
        }
        Ok(self.relu_out.forward(&out))
    }

    pub fn backward(&mut self, grad_output: &Tensor<f32, 4>) -> Result<Tensor<f32, 4>> {
        let g = self.relu_out.backward(grad_output)?;

        let branch = self.conv2.backward(&g)?;
        let branch = self.relu1.backward(&branch)?;
        let mut grad_input = self.conv1.backward(&branch)?;

        match &mut self.downsample {
            Some(ds) => grad_input.add_assign(&ds.backward(&g)?)?,
            None => grad_input.add_assign(&g)?,
        }
        Ok(grad_input)
    }
}

impl Module for BasicBlock {
    fn params(&self) -> Vec<ParamRef<'_>> {
        let mut params = self.conv1.params();
        params.extend(self.conv2.params());
        if let Some(ds) = &self.downsample {
            params.extend(ds.params());
        }
        params
    }

    fn params_mut(&mut self) -> Vec<ParamMut<'_>> {
        let mut params = self.conv1.params_mut();
        params.extend(self.conv2.params_mut());
        if let Some(ds) = &mut self.downsample {
            params.extend(ds.params_mut());
        }
        params
    }
}

/// A ResNet Bottleneck Block.
///
/// `conv1x1 -> relu -> conv3x3(stride) -> relu -> conv1x1(x4) -> (+ shortcut) -> relu`
#[derive(Debug, Clone)]
pub struct Bottleneck {
    conv1: Conv2d,
    relu1: Relu,
    conv2: Conv2d,
    relu2: Relu,
    conv3: Conv2d,
    downsample: Option<Conv2d>,
    relu_out: Relu,
}

impl Bottleneck {
    pub const EXPANSION: usize = 4;

    /// `width` is the inner channel count; the block outputs `width * 4` channels.
    pub fn new<R: Rng>(in_channels: usize, width: usize, stride: usize, rng: &mut R) -> Self {
        let out_channels = width * Self::EXPANSION;
        // The branch's last conv already carries a bias
        let downsample = (stride != 1 || in_channels != out_channels).then(|| {
            Conv2d::new(in_channels, out_channels, 1, stride, 0, rng).without_bias()
        });

        Self {
            conv1: Conv2d::new(in_channels, width, 1, 1, 0, rng),
            relu1: Relu::new(),
            conv2: Conv2d::new(width, width, 3, stride, 1, rng),
            relu2: Relu::new(),
            conv3: Conv2d::new(width, out_channels, 1, 1, 0, rng).zero_weights(),
            downsample,
            relu_out: Relu::new(),
        }
    }

    pub fn forward(&mut self, x: &Tensor<f32, 4>) -> Result<Tensor<f32, 4>> {
        let out = self.conv1.forward(x)?;
        let out = self.relu1.forward(&out);
        let out = self.conv2.forward(&out)?;
        let out = self.relu2.forward(&out);
        let mut out = self.conv3.forward(&out)?;

        match &mut self.downsample {
            Some(ds) => out.add_assign(&ds.forward(x)?)?,
            None => out.add_assign(x)?,
        }
        Ok(self.relu_out.forward(&out))
    }

    pub fn backward(&mut self, grad_output: &Tensor<f32, 4>) -> Result<Tensor<f32, 4>> {
        let g = self.relu_out.backward(grad_output)?;

        let branch = self.conv3.backward(&g)?;
        let branch = self.relu2.backward(&branch)?;
        let branch = self.conv2.backward(&branch)?;
        let branch = self.relu1.backward(&branch)?;
        let mut grad_input = self.conv1.backward(&branch)?;

        match &mut self.downsample {
            Some(ds) => grad_input.add_assign(&ds.backward(&g)?)?,
            None => grad_input.add_assign(&g)?,
        }
        Ok(grad_input)
    }
}

impl Module for Bottleneck {
    fn params(&self) -> Vec<ParamRef<'_>> {
        let mut params = self.conv1.params();
        params.extend(self.conv2.params());
        params.extend(self.conv3.params());
        if let Some(ds) = &self.downsample {
            params.extend(ds.params());
        }
        params
    }

    fn params_mut(&mut self) -> Vec<ParamMut<'_>> {
        let mut params = self.conv1.params_mut();
        params.extend(self.conv2.params_mut());
        params.extend(self.conv3.params_mut());
        if let Some(ds) = &mut self.downsample {
            params.extend(ds.params_mut());
        }
        params
    }
}

#[derive(Debug, Clone)]
enum Block {
    Basic(BasicBlock),
    Bottleneck(Bottleneck),
}

impl Block {
    fn forward(&mut self, x: &Tensor<f32, 4>) -> Result<Tensor<f32, 4>> {
        match self {
            Block::Basic(b) => b.forward(x),
            Block::Bottleneck(b) => b.forward(x),
        }
    }

    fn backward(&mut self, g: &Tensor<f32, 4>) -> Result<Tensor<f32, 4>> {
        match self {
            Block::Basic(b) => b.backward(g),
            Block::Bottleneck(b) => b.backward(g),
        }
    }

    fn params(&self) -> Vec<ParamRef<'_>> {
        match self {
            Block::Basic(b) => b.params(),
            Block::Bottleneck(b) => b.params(),
        }
    }

    fn params_mut(&mut self) -> Vec<ParamMut<'_>> {
        match self {
            Block::Basic(b) => b.params_mut(),
            Block::Bottleneck(b) => b.params_mut(),
        }
    }
}

/// ResNet Architecture.
#[derive(Debug, Clone)]
pub struct ResNet {
    name: &'static str,
    conv1: Conv2d,
    relu1: Relu,
    maxpool: MaxPool2d,
    blocks: Vec<Block>,
    gap: GlobalAvgPool,
    fc: Linear,
}

impl ResNet {
    pub fn resnet18<R: Rng>(num_classes: usize, rng: &mut R) -> Self {
        Self::basic("ResNet18", [2, 2, 2, 2], num_classes, rng)
    }

    pub fn resnet34<R: Rng>(num_classes: usize, rng: &mut R) -> Self {
        Self::basic("ResNet34", [3, 4, 6, 3], num_classes, rng)
    }

    pub fn resnet50<R: Rng>(num_classes: usize, rng: &mut R) -> Self {
        let conv1 = Conv2d::new(3, 64, 7, 2, 3, rng);

        let mut blocks = Vec::new();
        let mut in_channels = 64;
        for (stage, (&width, &depth)) in STAGE_WIDTHS.iter().zip(&[3usize, 4, 6, 3]).enumerate() {
            for i in 0..depth {
                let stride = if stage > 0 && i == 0 { 2 } else { 1 };
                blocks.push(Block::Bottleneck(Bottleneck::new(in_channels, width, stride, rng)));
                in_channels = width * Bottleneck::EXPANSION;
            }
        }

        Self::assemble("ResNet50", conv1, blocks, in_channels, num_classes, rng)
    }

    fn basic<R: Rng>(
        name: &'static str,
        depths: [usize; 4],
        num_classes: usize,
        rng: &mut R,
    ) -> Self {
        let conv1 = Conv2d::new(3, 64, 7, 2, 3, rng);

        let mut blocks = Vec::new();
        let mut in_channels = 64;
        for (stage, (&width, &depth)) in STAGE_WIDTHS.iter().zip(&depths).enumerate() {
            for i in 0..depth {
                let stride = if stage > 0 && i == 0 { 2 } else { 1 };
                blocks.push(Block::Basic(BasicBlock::new(in_channels, width, stride, rng)));
                in_channels = width * BasicBlock::EXPANSION;
            }
        }

        Self::assemble(name, conv1, blocks, in_channels, num_classes, rng)
    }

    fn assemble<R: Rng>(
        name: &'static str,
        conv1: Conv2d,
        blocks: Vec<Block>,
        features: usize,
        num_classes: usize,
        rng: &mut R,
    ) -> Self {
        Self {
            name,
            conv1,
            relu1: Relu::new(),
            maxpool: MaxPool2d::new(3, 2, 1),
            blocks,
            gap: GlobalAvgPool::new(),
            fc: Linear::new(features, num_classes, rng),
        }
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }
}

impl Module for ResNet {
    fn params(&self) -> Vec<ParamRef<'_>> {
        let mut params = self.conv1.params();
        for block in &self.blocks {
            params.extend(block.params());
        }
        params.extend(self.fc.params());
        params
    }

    fn params_mut(&mut self) -> Vec<ParamMut<'_>> {
        let mut params = self.conv1.params_mut();
        for block in &mut self.blocks {
            params.extend(block.params_mut());
        }
        params.extend(self.fc.params_mut());
        params
    }
}

impl ImageClassifier for ResNet {
    fn name(&self) -> &str {
        self.name
    }

    fn forward(&mut self, images: &Tensor<f32, 4>) -> Result<Tensor<f32, 2>> {
        let out = self.conv1.forward(images)?;
        let out = self.relu1.forward(&out);
        let mut out = self.maxpool.forward(&out)?;

        for block in &mut self.blocks {
            out = block.forward(&out)?;
        }

        let pooled = self.gap.forward(&out)?;
        self.fc.forward(&pooled)
    }

    fn backward(&mut self, grad_logits: &Tensor<f32, 2>) -> Result<()> {
        let g = self.fc.backward(grad_logits)?;
        let mut g = self.gap.backward(&g)?;

        for block in self.blocks.iter_mut().rev() {
            g = block.backward(&g)?;
        }

        let g = self.maxpool.backward(&g)?;
        let g = self.relu1.backward(&g)?;
        self.conv1.backward(&g)?;
        Ok(())
    }
}
