//! Architecture diagrams.
//!
//! The model's layer graph is laid out top to bottom by depth, one box per
//! layer, and rendered either to a PNG or to Graphviz DOT text.

pub mod canvas;
pub mod font;

use crate::error::MlError;
use crate::nn::Model;
use crate::nn::model::{LayerInfo, format_shape};
use canvas::{BLACK, Canvas, WHITE};
use petgraph::algo::toposort;
use petgraph::dot::{Config, Dot};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;
use std::path::Path;
use stroke_core::persistence;

const SCALE: usize = 2;
const PADDING: usize = 10;
const LINE_GAP: usize = 6;
const H_GAP: usize = 30;
const V_GAP: usize = 50;
const MARGIN: usize = 20;

/// What each box shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlotOptions {
    pub show_shapes: bool,
    pub show_layer_names: bool,
}

impl Default for PlotOptions {
    fn default() -> Self {
        Self {
            show_shapes: true,
            show_layer_names: true,
        }
    }
}

/// The layer graph of a model: layers as nodes, data flow as edges.
#[derive(Debug, Clone)]
pub struct ModelGraph {
    graph: DiGraph<LayerInfo, ()>,
}

impl ModelGraph {
    pub fn from_model(model: &Model) -> Result<Self, MlError> {
        Self::from_layers(model.layers())
    }

    pub fn from_layers(layers: Vec<LayerInfo>) -> Result<Self, MlError> {
        let mut graph = DiGraph::new();
        let mut by_name: HashMap<String, NodeIndex> = HashMap::new();
        for layer in layers {
            let name = layer.name.clone();
            let idx = graph.add_node(layer);
            if by_name.insert(name.clone(), idx).is_some() {
                return Err(MlError::model(format!("duplicate layer name '{name}'")));
            }
        }
        for target in graph.node_indices().collect::<Vec<_>>() {
            for source in graph[target].inbound.clone() {
                let from = by_name.get(&source).copied().ok_or_else(|| {
                    MlError::model(format!(
                        "layer '{}' consumes unknown layer '{source}'",
                        graph[target].name
                    ))
                })?;
                graph.add_edge(from, target, ());
            }
        }
        Ok(Self { graph })
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Nodes grouped by longest distance from an input.
    pub fn ranks(&self) -> Result<Vec<Vec<NodeIndex>>, MlError> {
        let order = toposort(&self.graph, None).map_err(|cycle| {
            MlError::model(format!(
                "layer graph has a cycle through '{}'",
                self.graph[cycle.node_id()].name
            ))
        })?;
        let mut depth: HashMap<NodeIndex, usize> = HashMap::new();
        for &node in &order {
            let d = self
                .graph
                .neighbors_directed(node, petgraph::Direction::Incoming)
                .filter_map(|n| depth.get(&n))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);
            depth.insert(node, d);
        }
        let max_depth = depth.values().copied().max().unwrap_or(0);
        let mut ranks = vec![Vec::new(); if order.is_empty() { 0 } else { max_depth + 1 }];
        for node in order {
            ranks[depth[&node]].push(node);
        }
        for rank in &mut ranks {
            rank.sort_by_key(|n| n.index());
        }
        Ok(ranks)
    }

    fn label_lines(layer: &LayerInfo, options: PlotOptions) -> Vec<String> {
        let mut lines = vec![if options.show_layer_names {
            format!("{}: {}", layer.name, layer.class_name)
        } else {
            layer.class_name.to_string()
        }];
        if options.show_shapes {
            let input = match layer.input_shapes.as_slice() {
                [single] => format_shape(single),
                many => format!(
                    "[{}]",
                    many.iter()
                        .map(|s| format_shape(s))
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            };
            lines.push(format!("input: {input}"));
            lines.push(format!("output: {}", format_shape(&layer.output_shape)));
        }
        lines
    }

    /// Graphviz DOT text for the same graph.
    pub fn to_dot(&self, options: PlotOptions) -> String {
        let labelled = self
            .graph
            .map(|_, layer| Self::label_lines(layer, options).join(" | "), |_, _| "");
        format!("{}", Dot::with_config(&labelled, &[Config::EdgeNoLabel]))
    }

    /// Rasterize the diagram.
    pub fn render(&self, options: PlotOptions) -> Result<Canvas, MlError> {
        let ranks = self.ranks()?;
        let line_height = Canvas::text_height(SCALE) + LINE_GAP;

        let mut sizes: HashMap<NodeIndex, (usize, usize, Vec<String>)> = HashMap::new();
        for node in self.graph.node_indices() {
            let lines = Self::label_lines(&self.graph[node], options);
            let text_w = lines
                .iter()
                .map(|l| Canvas::text_width(l, SCALE))
                .max()
                .unwrap_or(0);
            let w = text_w + 2 * PADDING;
            let h = lines.len() * line_height - LINE_GAP + 2 * PADDING;
            sizes.insert(node, (w, h, lines));
        }

        let row_width = |rank: &[NodeIndex]| -> usize {
            rank.iter().map(|n| sizes[n].0).sum::<usize>() + H_GAP * rank.len().saturating_sub(1)
        };
        let row_height =
            |rank: &[NodeIndex]| -> usize { rank.iter().map(|n| sizes[n].1).max().unwrap_or(0) };

        let content_w = ranks.iter().map(|r| row_width(r)).max().unwrap_or(0);
        let content_h = ranks.iter().map(|r| row_height(r)).sum::<usize>()
            + V_GAP * ranks.len().saturating_sub(1);
        let mut canvas = Canvas::new(content_w + 2 * MARGIN, content_h + 2 * MARGIN, WHITE);

        // Top-left corner of every box.
        let mut origin: HashMap<NodeIndex, (usize, usize)> = HashMap::new();
        let mut y = MARGIN;
        for rank in &ranks {
            let mut x = MARGIN + (content_w - row_width(rank)) / 2;
            let height = row_height(rank);
            for node in rank {
                let (w, h, lines) = &sizes[node];
                let top = y + (height - h) / 2;
                origin.insert(*node, (x, top));
                canvas.stroke_rect(x, top, *w, *h, BLACK);
                for (i, line) in lines.iter().enumerate() {
                    canvas.draw_text(x + PADDING, top + PADDING + i * line_height, line, SCALE, BLACK);
                }
                x += w + H_GAP;
            }
            y += height + V_GAP;
        }

        for edge in self.graph.edge_indices() {
            let Some((from, to)) = self.graph.edge_endpoints(edge) else {
                continue;
            };
            let ((fx, fy), (tx, ty)) = (origin[&from], origin[&to]);
            let (fw, fh, _) = &sizes[&from];
            let (tw, _, _) = &sizes[&to];
            canvas.arrow(
                (fx + fw / 2) as i64,
                (fy + fh) as i64,
                (tx + tw / 2) as i64,
                ty as i64 - 1,
                BLACK,
            );
        }

        Ok(canvas)
    }
}

/// Render `model`'s architecture to a PNG at `path`, creating parent
/// directories as needed.
pub fn plot_model(
    model: &Model,
    path: impl AsRef<Path>,
    options: PlotOptions,
) -> Result<(), MlError> {
    let path = path.as_ref();
    let canvas = ModelGraph::from_model(model)?.render(options)?;
    persistence::atomic_write(path, &canvas.encode_png()?)?;
    tracing::info!(
        path = %path.display(),
        width = canvas.width(),
        height = canvas.height(),
        "Wrote model diagram"
    );
    Ok(())
}

/// DOT text for `model`'s architecture.
pub fn to_dot(model: &Model, options: PlotOptions) -> Result<String, MlError> {
    Ok(ModelGraph::from_model(model)?.to_dot(options))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::get_model;
    use crate::hparams::HyperParameters;
    use crate::transform::FeatureContract;
    use serde_json::json;
    use tempfile::TempDir;

    fn model() -> Model {
        let hp: HyperParameters = serde_json::from_value(json!({
            "dense_units": 16,
            "num_layers": 2,
            "dropout_rate": 0.2,
            "learning_rate": 0.001
        }))
        .unwrap();
        let contract = FeatureContract::new("stroke")
            .with_categorical("work_type", 3)
            .with_categorical("smoking_status", 5)
            .with_numerical("age")
            .with_numerical("avg_glucose_level");
        get_model(&hp, &contract, false).unwrap()
    }

    #[test]
    fn test_graph_shape() {
        let graph = ModelGraph::from_model(&model()).unwrap();
        // 4 inputs, concatenate, 3 hidden dense, dropout, output
        assert_eq!(graph.node_count(), 10);
        assert_eq!(graph.edge_count(), 9);

        let ranks = graph.ranks().unwrap();
        assert_eq!(ranks.len(), 7);
        assert_eq!(ranks[0].len(), 4);
        assert!(ranks[1..].iter().all(|r| r.len() == 1));
    }

    #[test]
    fn test_unknown_inbound_layer() {
        let mut layers = model().layers();
        layers[5].inbound = vec!["ghost".to_string()];
        assert!(ModelGraph::from_layers(layers).is_err());
    }

    #[test]
    fn test_dot_labels() {
        let dot = to_dot(&model(), PlotOptions::default()).unwrap();
        assert!(dot.starts_with("digraph"));
        assert!(dot.contains(
            "concatenate: Concatenate | input: [(None, 4), (None, 6), (None, 1), (None, 1)] \
             | output: (None, 12)"
        ));
        assert!(dot.contains("dense_3: Dense"));

        let bare = to_dot(
            &model(),
            PlotOptions {
                show_shapes: false,
                show_layer_names: false,
            },
        )
        .unwrap();
        assert!(!bare.contains("output:"));
        assert!(!bare.contains("dense_3"));
    }

    #[test]
    fn test_plot_writes_png() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("images").join("model_plot.png");
        plot_model(&model(), &path, PlotOptions::default()).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
        let decoder = png::Decoder::new(std::io::Cursor::new(bytes));
        let reader = decoder.read_info().unwrap();
        let info = reader.info();
        assert!(info.width > 100 && info.height > 100);
    }
}
