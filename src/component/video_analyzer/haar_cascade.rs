//! Haar cascade 人臉偵測器
//!
//! 讀取 OpenCV 新版格式（`stageType` BOOST、`featureType` HAAR）的 cascade XML，
//! 以積分影像評估滑動視窗，行為對齊 OpenCV 的 `detectMultiScale`：
//!
//! 1. 以 `scale_factor` 逐步縮小影像建立金字塔
//! 2. 每個視窗先以內縮 1 像素區域的標準差做亮度正規化
//! 3. 逐級評估 boosted stage，任一級未過門檻即淘汰
//! 4. 以 `group_rectangles` 合併重疊候選框，鄰居數不足者捨棄

use super::summary::FaceBox;
use crate::error::{AnalysisError, AnalysisResult};
use image::GrayImage;
use image::imageops::{FilterType, resize};
use std::borrow::Cow;
use std::fs;
use std::path::Path;

/// 合併候選框時的相似度容許值（與 OpenCV 相同）
const GROUP_EPS: f64 = 0.2;

/// 多尺度偵測參數
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CascadeParams {
    pub scale_factor: f64,
    pub min_neighbors: usize,
    /// 最小偵測邊長（像素）
    pub min_size: u32,
}

impl Default for CascadeParams {
    fn default() -> Self {
        Self {
            scale_factor: 1.1,
            min_neighbors: 5,
            min_size: 30,
        }
    }
}

#[derive(Debug, Clone)]
struct WeightedRect {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    weight: f64,
}

#[derive(Debug, Clone)]
struct Node {
    left: i32,
    right: i32,
    feature: usize,
    threshold: f64,
}

#[derive(Debug, Clone)]
struct WeakClassifier {
    nodes: Vec<Node>,
    leaves: Vec<f64>,
}

#[derive(Debug, Clone)]
struct Stage {
    threshold: f64,
    classifiers: Vec<WeakClassifier>,
}

#[derive(Debug, Clone)]
pub struct HaarCascade {
    window_width: u32,
    window_height: u32,
    stages: Vec<Stage>,
    features: Vec<Vec<WeightedRect>>,
}

fn model_error(msg: impl Into<String>) -> AnalysisError {
    AnalysisError::ModelUnavailable(msg.into())
}

fn child<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
    name: &str,
) -> Option<roxmltree::Node<'a, 'input>> {
    node.children().find(|n| n.has_tag_name(name))
}

fn child_text<'a>(node: roxmltree::Node<'a, '_>, name: &str) -> Option<&'a str> {
    child(node, name).and_then(|n| n.text()).map(str::trim)
}

fn parse_number<T: std::str::FromStr>(text: Option<&str>, what: &str) -> AnalysisResult<T> {
    text.and_then(|t| t.parse::<T>().ok())
        .ok_or_else(|| model_error(format!("missing or invalid <{what}>")))
}

fn parse_list(text: Option<&str>, what: &str) -> AnalysisResult<Vec<f64>> {
    text.unwrap_or_default()
        .split_whitespace()
        .map(|v| v.parse::<f64>().map_err(|_| model_error(format!("invalid value in <{what}>"))))
        .collect()
}

fn elements<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
) -> impl Iterator<Item = roxmltree::Node<'a, 'input>> {
    node.children().filter(roxmltree::Node::is_element)
}

impl HaarCascade {
    pub fn load(path: &Path) -> AnalysisResult<Self> {
        let xml = fs::read_to_string(path)
            .map_err(|e| model_error(format!("cannot read {}: {e}", path.display())))?;
        Self::parse(&xml)
    }

    pub fn parse(xml: &str) -> AnalysisResult<Self> {
        let doc = roxmltree::Document::parse(xml)
            .map_err(|e| model_error(format!("invalid cascade XML: {e}")))?;

        let cascade = doc
            .descendants()
            .find(|n| n.has_tag_name("cascade"))
            .ok_or_else(|| model_error("no <cascade> element (only the new OpenCV format is supported)"))?;

        if child_text(cascade, "stageType") != Some("BOOST") {
            return Err(model_error("unsupported stageType"));
        }
        if child_text(cascade, "featureType") != Some("HAAR") {
            return Err(model_error("unsupported featureType"));
        }

        let window_width: u32 = parse_number(child_text(cascade, "width"), "width")?;
        let window_height: u32 = parse_number(child_text(cascade, "height"), "height")?;
        if window_width < 3 || window_height < 3 {
            return Err(model_error("cascade window is too small"));
        }

        let features = child(cascade, "features")
            .map(|node| {
                elements(node)
                    .map(|feature| Self::parse_feature(feature, window_width, window_height))
                    .collect::<AnalysisResult<Vec<_>>>()
            })
            .transpose()?
            .unwrap_or_default();

        let stages = child(cascade, "stages")
            .map(|node| {
                elements(node)
                    .map(|stage| Self::parse_stage(stage, features.len()))
                    .collect::<AnalysisResult<Vec<_>>>()
            })
            .transpose()?
            .unwrap_or_default();

        if stages.is_empty() {
            return Err(model_error("cascade has no stages"));
        }

        Ok(Self {
            window_width,
            window_height,
            stages,
            features,
        })
    }

    fn parse_feature(
        node: roxmltree::Node,
        window_width: u32,
        window_height: u32,
    ) -> AnalysisResult<Vec<WeightedRect>> {
        if child_text(node, "tilted") == Some("1") {
            return Err(model_error("tilted Haar features are not supported"));
        }

        let rects_node = child(node, "rects").ok_or_else(|| model_error("feature without <rects>"))?;
        let rects = elements(rects_node)
            .map(|rect| {
                let values = parse_list(rect.text(), "rects")?;
                let [x, y, w, h, weight] = values[..] else {
                    return Err(model_error("feature rect needs 5 values"));
                };
                if x < 0.0 || y < 0.0 || w <= 0.0 || h <= 0.0 {
                    return Err(model_error("feature rect has invalid geometry"));
                }
                let rect = WeightedRect {
                    x: x as u32,
                    y: y as u32,
                    width: w as u32,
                    height: h as u32,
                    weight,
                };
                if rect.x + rect.width > window_width || rect.y + rect.height > window_height {
                    return Err(model_error("feature rect exceeds the detection window"));
                }
                Ok(rect)
            })
            .collect::<AnalysisResult<Vec<_>>>()?;

        if rects.is_empty() {
            return Err(model_error("feature without rects"));
        }
        Ok(rects)
    }

    fn parse_stage(node: roxmltree::Node, feature_count: usize) -> AnalysisResult<Stage> {
        let threshold: f64 = parse_number(child_text(node, "stageThreshold"), "stageThreshold")?;
        let weak_node =
            child(node, "weakClassifiers").ok_or_else(|| model_error("stage without classifiers"))?;

        let classifiers = elements(weak_node)
            .map(|weak| Self::parse_weak_classifier(weak, feature_count))
            .collect::<AnalysisResult<Vec<_>>>()?;

        Ok(Stage {
            threshold,
            classifiers,
        })
    }

    /// 每個內部節點為 `left right featureIdx threshold`，子節點 ≤ 0 表示葉節點 `-child`
    fn parse_weak_classifier(
        node: roxmltree::Node,
        feature_count: usize,
    ) -> AnalysisResult<WeakClassifier> {
        let raw = parse_list(child_text(node, "internalNodes"), "internalNodes")?;
        let leaves = parse_list(child_text(node, "leafValues"), "leafValues")?;
        if raw.is_empty() || raw.len() % 4 != 0 {
            return Err(model_error("internalNodes must contain groups of 4 values"));
        }

        let nodes: Vec<Node> = raw
            .chunks_exact(4)
            .map(|n| Node {
                left: n[0] as i32,
                right: n[1] as i32,
                feature: n[2] as usize,
                threshold: n[3],
            })
            .collect();

        // 子節點只能往後指，確保評估一定會結束
        for (index, node) in nodes.iter().enumerate() {
            if node.feature >= feature_count {
                return Err(model_error("classifier references a missing feature"));
            }
            for child_index in [node.left, node.right] {
                let valid = if child_index > 0 {
                    (child_index as usize) > index && (child_index as usize) < nodes.len()
                } else {
                    (child_index.unsigned_abs() as usize) < leaves.len()
                };
                if !valid {
                    return Err(model_error("classifier tree is malformed"));
                }
            }
        }

        Ok(WeakClassifier { nodes, leaves })
    }

    #[must_use]
    pub const fn window_size(&self) -> (u32, u32) {
        (self.window_width, self.window_height)
    }

    /// 在灰階影像上進行多尺度偵測
    #[must_use]
    pub fn detect_multi_scale(&self, image: &GrayImage, params: &CascadeParams) -> Vec<FaceBox> {
        let (image_width, image_height) = image.dimensions();
        let mut candidates = Vec::new();
        let mut factor = 1.0_f64;

        loop {
            let scaled_width = (f64::from(image_width) / factor).round() as u32;
            let scaled_height = (f64::from(image_height) / factor).round() as u32;
            if scaled_width <= self.window_width || scaled_height <= self.window_height {
                break;
            }

            let window_width = (f64::from(self.window_width) * factor).round() as u32;
            let window_height = (f64::from(self.window_height) * factor).round() as u32;

            if window_width >= params.min_size && window_height >= params.min_size {
                let scaled: Cow<GrayImage> = if (factor - 1.0).abs() < f64::EPSILON {
                    Cow::Borrowed(image)
                } else {
                    Cow::Owned(resize(image, scaled_width, scaled_height, FilterType::Triangle))
                };
                let integral = IntegralImage::new(&scaled);
                let step = if factor > 2.0 { 1 } else { 2 };

                for y in (0..scaled_height - self.window_height).step_by(step) {
                    for x in (0..scaled_width - self.window_width).step_by(step) {
                        if self.evaluate_window(&integral, x, y) {
                            candidates.push(FaceBox {
                                x: (f64::from(x) * factor).round() as u32,
                                y: (f64::from(y) * factor).round() as u32,
                                width: window_width,
                                height: window_height,
                            });
                        }
                    }
                }
            }

            if params.scale_factor <= 1.0 {
                break;
            }
            factor *= params.scale_factor;
        }

        group_rectangles(candidates, params.min_neighbors, GROUP_EPS)
    }

    fn evaluate_window(&self, integral: &IntegralImage, x: u32, y: u32) -> bool {
        let inner_width = self.window_width - 2;
        let inner_height = self.window_height - 2;
        let area = f64::from(inner_width * inner_height);
        let sum = integral.sum(x + 1, y + 1, inner_width, inner_height);
        let sq_sum = integral.sq_sum(x + 1, y + 1, inner_width, inner_height);
        let variance = area * sq_sum - sum * sum;
        let norm = if variance > 0.0 { variance.sqrt() } else { 1.0 };

        for stage in &self.stages {
            let mut total = 0.0;
            for classifier in &stage.classifiers {
                let mut index = 0_i32;
                loop {
                    let node = &classifier.nodes[index as usize];
                    let value = self.feature_value(integral, node.feature, x, y);
                    index = if value < node.threshold * norm {
                        node.left
                    } else {
                        node.right
                    };
                    if index <= 0 {
                        break;
                    }
                }
                total += classifier.leaves[index.unsigned_abs() as usize];
            }
            if total < stage.threshold {
                return false;
            }
        }
        true
    }

    fn feature_value(&self, integral: &IntegralImage, feature: usize, x: u32, y: u32) -> f64 {
        self.features[feature]
            .iter()
            .map(|r| r.weight * integral.sum(x + r.x, y + r.y, r.width, r.height))
            .sum()
    }
}

/// 積分影像與平方積分影像，尺寸為 (w + 1) × (h + 1)
struct IntegralImage {
    stride: usize,
    sum: Vec<u64>,
    sq_sum: Vec<u64>,
}

impl IntegralImage {
    fn new(image: &GrayImage) -> Self {
        let (width, height) = image.dimensions();
        let stride = width as usize + 1;
        let mut sum = vec![0u64; stride * (height as usize + 1)];
        let mut sq_sum = vec![0u64; stride * (height as usize + 1)];

        for y in 0..height as usize {
            let mut row_sum = 0u64;
            let mut row_sq_sum = 0u64;
            for x in 0..width as usize {
                let value = u64::from(image.get_pixel(x as u32, y as u32)[0]);
                row_sum += value;
                row_sq_sum += value * value;
                let idx = (y + 1) * stride + x + 1;
                sum[idx] = sum[idx - stride] + row_sum;
                sq_sum[idx] = sq_sum[idx - stride] + row_sq_sum;
            }
        }

        Self {
            stride,
            sum,
            sq_sum,
        }
    }

    fn rect(table: &[u64], stride: usize, x: u32, y: u32, width: u32, height: u32) -> f64 {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + width as usize, y0 + height as usize);
        let total = (table[y1 * stride + x1] + table[y0 * stride + x0])
            - (table[y0 * stride + x1] + table[y1 * stride + x0]);
        total as f64
    }

    fn sum(&self, x: u32, y: u32, width: u32, height: u32) -> f64 {
        Self::rect(&self.sum, self.stride, x, y, width, height)
    }

    fn sq_sum(&self, x: u32, y: u32, width: u32, height: u32) -> f64 {
        Self::rect(&self.sq_sum, self.stride, x, y, width, height)
    }
}

fn similar(a: &FaceBox, b: &FaceBox, eps: f64) -> bool {
    let delta = eps * f64::from(a.width.min(b.width) + a.height.min(b.height)) * 0.5;
    let close = |p: u32, q: u32| f64::from(p.abs_diff(q)) <= delta;
    close(a.x, b.x)
        && close(a.y, b.y)
        && close(a.x + a.width, b.x + b.width)
        && close(a.y + a.height, b.y + b.height)
}

fn find_root(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// 合併相近的候選框
///
/// 相近的框歸為同一群並取平均，群內數量需大於 `group_threshold`；
/// 被更可信的大框包住的小群會被丟棄。`group_threshold` 為 0 時原樣回傳。
#[must_use]
pub fn group_rectangles(rects: Vec<FaceBox>, group_threshold: usize, eps: f64) -> Vec<FaceBox> {
    if group_threshold == 0 || rects.is_empty() {
        return rects;
    }

    let n = rects.len();
    let mut parent: Vec<usize> = (0..n).collect();
    for i in 0..n {
        for j in (i + 1)..n {
            if similar(&rects[i], &rects[j], eps) {
                let (ri, rj) = (find_root(&mut parent, i), find_root(&mut parent, j));
                if ri != rj {
                    parent[rj] = ri;
                }
            }
        }
    }

    // (x, y, w, h 的總和, 數量)，依第一次出現的順序排列
    let mut clusters: Vec<(usize, [u64; 4], usize)> = Vec::new();
    for (i, rect) in rects.iter().enumerate() {
        let root = find_root(&mut parent, i);
        let position = match clusters.iter().position(|(r, _, _)| *r == root) {
            Some(p) => p,
            None => {
                clusters.push((root, [0; 4], 0));
                clusters.len() - 1
            }
        };
        let (_, sums, count) = &mut clusters[position];
        sums[0] += u64::from(rect.x);
        sums[1] += u64::from(rect.y);
        sums[2] += u64::from(rect.width);
        sums[3] += u64::from(rect.height);
        *count += 1;
    }

    let averaged: Vec<(FaceBox, usize)> = clusters
        .iter()
        .map(|(_, sums, count)| {
            let avg = |v: u64| (v as f64 / *count as f64).round() as u32;
            let rect = FaceBox {
                x: avg(sums[0]),
                y: avg(sums[1]),
                width: avg(sums[2]),
                height: avg(sums[3]),
            };
            (rect, *count)
        })
        .collect();

    averaged
        .iter()
        .enumerate()
        .filter(|(_, (_, n1))| *n1 > group_threshold)
        .filter(|(i, (r1, n1))| {
            !averaged.iter().enumerate().any(|(j, (r2, n2))| {
                if j == *i || *n2 <= group_threshold {
                    return false;
                }
                let dx = (f64::from(r2.width) * eps).round() as i64;
                let dy = (f64::from(r2.height) * eps).round() as i64;
                let (x1, y1, w1, h1) = (
                    i64::from(r1.x),
                    i64::from(r1.y),
                    i64::from(r1.width),
                    i64::from(r1.height),
                );
                let (x2, y2, w2, h2) = (
                    i64::from(r2.x),
                    i64::from(r2.y),
                    i64::from(r2.width),
                    i64::from(r2.height),
                );
                x1 >= x2 - dx
                    && y1 >= y2 - dy
                    && x1 + w1 <= x2 + w2 + dx
                    && y1 + h1 <= y2 + h2 + dy
                    && (*n2 > (*n1).max(3) || *n1 < 3)
            })
        })
        .map(|(_, (rect, _))| *rect)
        .collect()
}
