// 该文件是 Shaowei （哨卫） 项目的一部分。
// src/model/backbone.rs - 骨干网络定义
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

//! 紧凑版 ResNet / VGG
//!
//! 通道宽度为经典结构的 1/8，参数名与 PyTorch 的层级命名保持一致，
//! 例如 `layer2.0.downsample.weight`、`fc.3.bias`。

use candle_core::{Module, Result, Tensor};
use candle_nn::{Conv2d, Conv2dConfig, Linear, VarBuilder};

use super::{Backbone, capture::ActivationRegistry};

const STEM_CHANNELS: usize = 8;
const RESNET_WIDTHS: [usize; 4] = [8, 16, 32, 64];
const RESNET_STRIDES: [usize; 4] = [1, 2, 2, 2];
const BOTTLENECK_EXPANSION: usize = 4;
const VGG_BLOCKS: [&[usize]; 5] = [&[8, 8], &[16, 16], &[32, 32, 32], &[64, 64, 64], &[64, 64, 64]];
const HEAD_HIDDEN: usize = 512;

fn conv(in_c: usize, out_c: usize, kernel: usize, stride: usize, vb: VarBuilder) -> Result<Conv2d> {
  let config = Conv2dConfig {
    padding: kernel / 2,
    stride,
    ..Default::default()
  };
  candle_nn::conv2d(in_c, out_c, kernel, config, vb)
}

/// 全局平均池化 → linear → ReLU → linear
struct Head {
  hidden: Linear,
  logits: Linear,
}

impl Head {
  fn new(in_c: usize, num_classes: usize, vb: VarBuilder) -> Result<Self> {
    Ok(Self {
      hidden: candle_nn::linear(in_c, HEAD_HIDDEN, vb.pp("0"))?,
      logits: candle_nn::linear(HEAD_HIDDEN, num_classes, vb.pp("3"))?,
    })
  }

  fn forward(&self, x: &Tensor) -> Result<Tensor> {
    let pooled = x.mean((2, 3))?;
    let hidden = self.hidden.forward(&pooled)?.relu()?;
    self.logits.forward(&hidden)
  }
}

struct BasicBlock {
  conv1: Conv2d,
  conv2: Conv2d,
  downsample: Option<Conv2d>,
}

impl BasicBlock {
  fn new(in_c: usize, out_c: usize, stride: usize, vb: VarBuilder) -> Result<Self> {
    let downsample = if stride != 1 || in_c != out_c {
      Some(conv(in_c, out_c, 1, stride, vb.pp("downsample"))?)
    } else {
      None
    };
    Ok(Self {
      conv1: conv(in_c, out_c, 3, stride, vb.pp("conv1"))?,
      conv2: conv(out_c, out_c, 3, 1, vb.pp("conv2"))?,
      downsample,
    })
  }

  fn forward(&self, x: &Tensor) -> Result<Tensor> {
    let y = self.conv1.forward(x)?.relu()?;
    let y = self.conv2.forward(&y)?;
    let shortcut = match &self.downsample {
      Some(downsample) => downsample.forward(x)?,
      None => x.clone(),
    };
    (y + shortcut)?.relu()
  }
}

struct Bottleneck {
  conv1: Conv2d,
  conv2: Conv2d,
  conv3: Conv2d,
  downsample: Option<Conv2d>,
}

impl Bottleneck {
  fn new(in_c: usize, width: usize, stride: usize, vb: VarBuilder) -> Result<Self> {
    let out_c = width * BOTTLENECK_EXPANSION;
    let downsample = if stride != 1 || in_c != out_c {
      Some(conv(in_c, out_c, 1, stride, vb.pp("downsample"))?)
    } else {
      None
    };
    Ok(Self {
      conv1: conv(in_c, width, 1, 1, vb.pp("conv1"))?,
      conv2: conv(width, width, 3, stride, vb.pp("conv2"))?,
      conv3: conv(width, out_c, 1, 1, vb.pp("conv3"))?,
      downsample,
    })
  }

  fn forward(&self, x: &Tensor) -> Result<Tensor> {
    let y = self.conv1.forward(x)?.relu()?;
    let y = self.conv2.forward(&y)?.relu()?;
    let y = self.conv3.forward(&y)?;
    let shortcut = match &self.downsample {
      Some(downsample) => downsample.forward(x)?,
      None => x.clone(),
    };
    (y + shortcut)?.relu()
  }
}

enum Block {
  Basic(BasicBlock),
  Bottleneck(Bottleneck),
}

impl Block {
  fn forward(&self, x: &Tensor) -> Result<Tensor> {
    match self {
      Block::Basic(block) => block.forward(x),
      Block::Bottleneck(block) => block.forward(x),
    }
  }
}

struct Stage {
  name: &'static str,
  blocks: Vec<Block>,
}

pub(crate) struct ResNet {
  stem: Conv2d,
  stages: Vec<Stage>,
  fc: Head,
}

impl ResNet {
  fn new(
    depths: [usize; 4],
    bottleneck: bool,
    capture_points: [&'static str; 4],
    num_classes: usize,
    vb: VarBuilder,
  ) -> Result<Self> {
    let stem = conv(3, STEM_CHANNELS, 7, 2, vb.pp("stem"))?;

    let mut in_c = STEM_CHANNELS;
    let mut stages = Vec::with_capacity(4);
    for (idx, name) in capture_points.into_iter().enumerate() {
      let stage_vb = vb.pp(name);
      let width = RESNET_WIDTHS[idx];
      let mut blocks = Vec::with_capacity(depths[idx]);
      for b in 0..depths[idx] {
        let stride = if b == 0 { RESNET_STRIDES[idx] } else { 1 };
        let block_vb = stage_vb.pp(b.to_string());
        if bottleneck {
          blocks.push(Block::Bottleneck(Bottleneck::new(in_c, width, stride, block_vb)?));
          in_c = width * BOTTLENECK_EXPANSION;
        } else {
          blocks.push(Block::Basic(BasicBlock::new(in_c, width, stride, block_vb)?));
          in_c = width;
        }
      }
      stages.push(Stage { name, blocks });
    }

    Ok(Self {
      stem,
      stages,
      fc: Head::new(in_c, num_classes, vb.pp("fc"))?,
    })
  }

  fn forward(&self, x: &Tensor, capture: &mut ActivationRegistry) -> Result<Tensor> {
    let mut x = self.stem.forward(x)?.relu()?.max_pool2d(2)?;
    for stage in &self.stages {
      for block in &stage.blocks {
        x = block.forward(&x)?;
      }
      capture.record(stage.name, &x);
    }
    self.fc.forward(&x)
  }
}

struct VggBlock {
  convs: Vec<Conv2d>,
  /// 记录本块第一个卷积输出时使用的层名
  capture: Option<&'static str>,
}

pub(crate) struct Vgg {
  blocks: Vec<VggBlock>,
  fc: Head,
}

impl Vgg {
  fn new(capture_points: [&'static str; 4], num_classes: usize, vb: VarBuilder) -> Result<Self> {
    let features = vb.pp("features");
    let mut in_c = 3;
    let mut blocks = Vec::with_capacity(VGG_BLOCKS.len());
    for (idx, widths) in VGG_BLOCKS.iter().enumerate() {
      let block_vb = features.pp(idx.to_string());
      let mut convs = Vec::with_capacity(widths.len());
      for (c, &out_c) in widths.iter().enumerate() {
        convs.push(conv(in_c, out_c, 3, 1, block_vb.pp(c.to_string()))?);
        in_c = out_c;
      }
      // 第 2~5 块
      let capture = idx.checked_sub(1).map(|i| capture_points[i]);
      blocks.push(VggBlock { convs, capture });
    }

    Ok(Self {
      blocks,
      fc: Head::new(in_c, num_classes, vb.pp("fc"))?,
    })
  }

  fn forward(&self, x: &Tensor, capture: &mut ActivationRegistry) -> Result<Tensor> {
    let mut x = x.clone();
    for block in &self.blocks {
      for (c, conv) in block.convs.iter().enumerate() {
        x = conv.forward(&x)?;
        if let (0, Some(name)) = (c, block.capture) {
          capture.record(name, &x);
        }
        x = x.relu()?;
      }
      x = x.max_pool2d(2)?;
    }
    self.fc.forward(&x)
  }
}

/// 按骨干类型分派的网络
pub(crate) enum Network {
  ResNet(ResNet),
  Vgg(Vgg),
}

impl Network {
  pub(crate) fn new(backbone: Backbone, num_classes: usize, vb: VarBuilder) -> Result<Self> {
    let points = backbone.capture_points();
    let network = match backbone {
      Backbone::ResNet18 => Network::ResNet(ResNet::new([2, 2, 2, 2], false, points, num_classes, vb)?),
      Backbone::ResNet34 => Network::ResNet(ResNet::new([3, 4, 6, 3], false, points, num_classes, vb)?),
      Backbone::ResNet50 => Network::ResNet(ResNet::new([3, 4, 6, 3], true, points, num_classes, vb)?),
      Backbone::Vgg16 => Network::Vgg(Vgg::new(points, num_classes, vb)?),
    };
    Ok(network)
  }

  /// 前向计算，输入 `(1, 3, H, W)`，输出 `(1, num_classes)` 的 logits
  pub(crate) fn forward(&self, x: &Tensor, capture: &mut ActivationRegistry) -> Result<Tensor> {
    match self {
      Network::ResNet(net) => net.forward(x, capture),
      Network::Vgg(net) => net.forward(x, capture),
    }
  }
}
