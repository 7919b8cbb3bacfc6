//! The DB network in candle: ResNet backbone, FPN neck and the
//! binarize / threshold head.

use candle_core::{Module, ModuleT, Result, Tensor};
use candle_nn::{
    batch_norm, conv2d_no_bias, conv_transpose2d, ops, BatchNorm, Conv2d, Conv2dConfig, ConvTranspose2d,
    ConvTranspose2dConfig, VarBuilder,
};

use crate::config::{Backbone, ModelConfig};

#[derive(Debug, Clone, Copy)]
pub struct DbNetConfig {
    pub backbone: Backbone,
    pub inner_channels: usize,
    /// Amplification factor of the step function.
    pub k: f64,
}

impl Default for DbNetConfig {
    fn default() -> Self {
        Self {
            backbone: Backbone::Resnet18,
            inner_channels: 256,
            k: 50.0,
        }
    }
}

impl From<&ModelConfig> for DbNetConfig {
    fn from(cfg: &ModelConfig) -> Self {
        Self {
            backbone: cfg.backbone,
            inner_channels: cfg.inner_channels,
            ..Self::default()
        }
    }
}

impl Backbone {
    fn layers(&self) -> [usize; 4] {
        match self {
            Backbone::Resnet18 => [2, 2, 2, 2],
            Backbone::Resnet34 => [3, 4, 6, 3],
        }
    }
}

const STAGE_CHANNELS: [usize; 4] = [64, 128, 256, 512];

fn conv(c_in: usize, c_out: usize, ksize: usize, stride: usize, padding: usize, vb: VarBuilder) -> Result<Conv2d> {
    let cfg = Conv2dConfig {
        stride,
        padding,
        ..Default::default()
    };
    conv2d_no_bias(c_in, c_out, ksize, cfg, vb)
}

fn deconv(c_in: usize, c_out: usize, vb: VarBuilder) -> Result<ConvTranspose2d> {
    let cfg = ConvTranspose2dConfig {
        stride: 2,
        ..Default::default()
    };
    conv_transpose2d(c_in, c_out, 2, cfg, vb)
}

#[derive(Debug, Clone)]
struct BasicBlock {
    conv1: Conv2d,
    bn1: BatchNorm,
    conv2: Conv2d,
    bn2: BatchNorm,
    downsample: Option<(Conv2d, BatchNorm)>,
}

impl BasicBlock {
    fn new(c_in: usize, c_out: usize, stride: usize, vb: VarBuilder) -> Result<Self> {
        let downsample = if stride != 1 || c_in != c_out {
            Some((
                conv(c_in, c_out, 1, stride, 0, vb.pp("downsample.0"))?,
                batch_norm(c_out, 1e-5, vb.pp("downsample.1"))?,
            ))
        } else {
            None
        };
        Ok(Self {
            conv1: conv(c_in, c_out, 3, stride, 1, vb.pp("conv1"))?,
            bn1: batch_norm(c_out, 1e-5, vb.pp("bn1"))?,
            conv2: conv(c_out, c_out, 3, 1, 1, vb.pp("conv2"))?,
            bn2: batch_norm(c_out, 1e-5, vb.pp("bn2"))?,
            downsample,
        })
    }
}

impl ModuleT for BasicBlock {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let ys = self.bn1.forward_t(&self.conv1.forward(xs)?, train)?.relu()?;
        let ys = self.bn2.forward_t(&self.conv2.forward(&ys)?, train)?;
        let residual = match &self.downsample {
            Some((conv, bn)) => bn.forward_t(&conv.forward(xs)?, train)?,
            None => xs.clone(),
        };
        (ys + residual)?.relu()
    }
}

/// ResNet returning the stride 4, 8, 16 and 32 feature maps.
#[derive(Debug, Clone)]
pub struct ResNet {
    conv1: Conv2d,
    bn1: BatchNorm,
    stages: Vec<Vec<BasicBlock>>,
}

impl ResNet {
    pub fn new(backbone: Backbone, vb: VarBuilder) -> Result<Self> {
        let mut stages = Vec::with_capacity(4);
        let mut c_in = 64;
        for (i, (&c_out, &count)) in STAGE_CHANNELS.iter().zip(backbone.layers().iter()).enumerate() {
            let vb_layer = vb.pp(format!("layer{}", i + 1));
            let stride = if i == 0 { 1 } else { 2 };
            let mut blocks = Vec::with_capacity(count);
            for j in 0..count {
                let block_stride = if j == 0 { stride } else { 1 };
                blocks.push(BasicBlock::new(c_in, c_out, block_stride, vb_layer.pp(j.to_string()))?);
                c_in = c_out;
            }
            stages.push(blocks);
        }
        Ok(Self {
            conv1: conv(3, 64, 7, 2, 3, vb.pp("conv1"))?,
            bn1: batch_norm(64, 1e-5, vb.pp("bn1"))?,
            stages,
        })
    }

    pub fn forward_features(&self, xs: &Tensor, train: bool) -> Result<Vec<Tensor>> {
        let mut xs = self.bn1.forward_t(&self.conv1.forward(xs)?, train)?.relu()?;
        // 2x2 pooling keeps the stride-4 stem and stays differentiable in candle
        xs = xs.max_pool2d(2)?;
        let mut features = Vec::with_capacity(self.stages.len());
        for stage in &self.stages {
            for block in stage {
                xs = block.forward_t(&xs, train)?;
            }
            features.push(xs.clone());
        }
        Ok(features)
    }
}

fn upsample_like(xs: &Tensor, like: &Tensor) -> Result<Tensor> {
    let (_, _, h, w) = like.dims4()?;
    xs.upsample_nearest2d(h, w)
}

fn upsample_by(xs: &Tensor, scale: usize) -> Result<Tensor> {
    let (_, _, h, w) = xs.dims4()?;
    xs.upsample_nearest2d(h * scale, w * scale)
}

/// Feature pyramid fusing the four backbone stages at stride 4.
#[derive(Debug, Clone)]
pub struct Fpn {
    lateral: [Conv2d; 4],
    output: [Conv2d; 4],
}

impl Fpn {
    pub fn new(inner_channels: usize, vb: VarBuilder) -> Result<Self> {
        let lateral = [
            conv(STAGE_CHANNELS[0], inner_channels, 1, 1, 0, vb.pp("in2"))?,
            conv(STAGE_CHANNELS[1], inner_channels, 1, 1, 0, vb.pp("in3"))?,
            conv(STAGE_CHANNELS[2], inner_channels, 1, 1, 0, vb.pp("in4"))?,
            conv(STAGE_CHANNELS[3], inner_channels, 1, 1, 0, vb.pp("in5"))?,
        ];
        let out_channels = inner_channels / 4;
        let output = [
            conv(inner_channels, out_channels, 3, 1, 1, vb.pp("out2"))?,
            conv(inner_channels, out_channels, 3, 1, 1, vb.pp("out3"))?,
            conv(inner_channels, out_channels, 3, 1, 1, vb.pp("out4"))?,
            conv(inner_channels, out_channels, 3, 1, 1, vb.pp("out5"))?,
        ];
        Ok(Self { lateral, output })
    }

    pub fn forward(&self, features: &[Tensor]) -> Result<Tensor> {
        let [c2, c3, c4, c5] = features else {
            candle_core::bail!("fpn expects 4 feature maps, got {}", features.len())
        };
        let in5 = self.lateral[3].forward(c5)?;
        let in4 = self.lateral[2].forward(c4)?;
        let in3 = self.lateral[1].forward(c3)?;
        let in2 = self.lateral[0].forward(c2)?;

        let out4 = (upsample_like(&in5, &in4)? + in4)?;
        let out3 = (upsample_like(&out4, &in3)? + in3)?;
        let out2 = (upsample_like(&out3, &in2)? + in2)?;

        let p5 = upsample_by(&self.output[3].forward(&in5)?, 8)?;
        let p4 = upsample_by(&self.output[2].forward(&out4)?, 4)?;
        let p3 = upsample_by(&self.output[1].forward(&out3)?, 2)?;
        let p2 = self.output[0].forward(&out2)?;
        Tensor::cat(&[&p5, &p4, &p3, &p2], 1)
    }
}

/// conv3x3-BN-ReLU, then two stride-2 transposed convs back to input resolution.
#[derive(Debug, Clone)]
struct HeadBranch {
    conv: Conv2d,
    bn1: BatchNorm,
    up1: ConvTranspose2d,
    bn2: BatchNorm,
    up2: ConvTranspose2d,
}

impl HeadBranch {
    fn new(inner_channels: usize, vb: VarBuilder) -> Result<Self> {
        let mid = inner_channels / 4;
        Ok(Self {
            conv: conv(inner_channels, mid, 3, 1, 1, vb.pp("conv"))?,
            bn1: batch_norm(mid, 1e-5, vb.pp("bn1"))?,
            up1: deconv(mid, mid, vb.pp("up1"))?,
            bn2: batch_norm(mid, 1e-5, vb.pp("bn2"))?,
            up2: deconv(mid, 1, vb.pp("up2"))?,
        })
    }
}

impl ModuleT for HeadBranch {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let xs = self.bn1.forward_t(&self.conv.forward(xs)?, train)?.relu()?;
        let xs = self.bn2.forward_t(&self.up1.forward(&xs)?, train)?.relu()?;
        ops::sigmoid(&self.up2.forward(&xs)?)
    }
}

#[derive(Debug, Clone)]
pub struct DbHead {
    binarize: HeadBranch,
    thresh: HeadBranch,
    k: f64,
}

impl DbHead {
    pub fn new(inner_channels: usize, k: f64, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            binarize: HeadBranch::new(inner_channels, vb.pp("binarize"))?,
            thresh: HeadBranch::new(inner_channels, vb.pp("thresh"))?,
            k,
        })
    }

    /// `1 / (1 + e^{-k (P - T)})`.
    pub fn step_function(&self, prob: &Tensor, thresh: &Tensor) -> Result<Tensor> {
        ops::sigmoid(&(prob - thresh)?.affine(self.k, 0.0)?)
    }
}

impl ModuleT for DbHead {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let prob = self.binarize.forward_t(xs, train)?;
        let thresh = self.thresh.forward_t(xs, train)?;
        if train {
            let binary = self.step_function(&prob, &thresh)?;
            Tensor::cat(&[&prob, &thresh, &binary], 1)
        } else {
            Tensor::cat(&[&prob, &thresh], 1)
        }
    }
}

/// Full detector network. Output is `N x 3 x H x W` (probability, threshold,
/// approximate binary) in training mode and `N x 2 x H x W` otherwise.
/// Input sides must be multiples of 32.
#[derive(Debug, Clone)]
pub struct DbTextModel {
    backbone: ResNet,
    neck: Fpn,
    head: DbHead,
}

impl DbTextModel {
    pub fn new(cfg: &DbNetConfig, vb: VarBuilder) -> Result<Self> {
        if cfg.inner_channels < 4 || cfg.inner_channels % 4 != 0 {
            candle_core::bail!("inner_channels must be a positive multiple of 4, got {}", cfg.inner_channels)
        }
        Ok(Self {
            backbone: ResNet::new(cfg.backbone, vb.pp("backbone"))?,
            neck: Fpn::new(cfg.inner_channels, vb.pp("neck"))?,
            head: DbHead::new(cfg.inner_channels, cfg.k, vb.pp("head"))?,
        })
    }
}

impl ModuleT for DbTextModel {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let (_, _, h, w) = xs.dims4()?;
        if h % 32 != 0 || w % 32 != 0 {
            candle_core::bail!("input size {w}x{h} is not a multiple of 32")
        }
        let features = self.backbone.forward_features(xs, train)?;
        let fused = self.neck.forward(&features)?;
        self.head.forward_t(&fused, train)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn small_model(varmap: &VarMap) -> DbTextModel {
        let vb = VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu);
        let cfg = DbNetConfig {
            inner_channels: 32,
            ..DbNetConfig::default()
        };
        DbTextModel::new(&cfg, vb).unwrap()
    }

    #[test]
    fn test_output_channels_and_resolution() {
        let varmap = VarMap::new();
        let model = small_model(&varmap);
        let xs = Tensor::randn(0f32, 1f32, (1, 3, 64, 96), &Device::Cpu).unwrap();

        let train = model.forward_t(&xs, true).unwrap();
        assert_eq!(train.dims4().unwrap(), (1, 3, 64, 96));
        let eval = model.forward_t(&xs, false).unwrap();
        assert_eq!(eval.dims4().unwrap(), (1, 2, 64, 96));

        let values = eval.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_rejects_unaligned_input() {
        let varmap = VarMap::new();
        let model = small_model(&varmap);
        let xs = Tensor::zeros((1, 3, 50, 64), DType::F32, &Device::Cpu).unwrap();
        assert!(model.forward_t(&xs, false).is_err());
    }

    #[test]
    fn test_step_function() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let head = DbHead::new(8, 50.0, vb).unwrap();
        let prob = Tensor::new(&[0.9f32, 0.1, 0.5], &Device::Cpu).unwrap();
        let thresh = Tensor::new(&[0.5f32, 0.5, 0.5], &Device::Cpu).unwrap();
        let binary = head.step_function(&prob, &thresh).unwrap().to_vec1::<f32>().unwrap();
        assert!(binary[0] > 0.99);
        assert!(binary[1] < 0.01);
        assert!((binary[2] - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_resnet34_has_more_parameters() {
        let vm18 = VarMap::new();
        ResNet::new(Backbone::Resnet18, VarBuilder::from_varmap(&vm18, DType::F32, &Device::Cpu)).unwrap();
        let vm34 = VarMap::new();
        ResNet::new(Backbone::Resnet34, VarBuilder::from_varmap(&vm34, DType::F32, &Device::Cpu)).unwrap();
        assert!(vm34.all_vars().len() > vm18.all_vars().len());
    }
}
