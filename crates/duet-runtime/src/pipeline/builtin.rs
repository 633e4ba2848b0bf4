//! Built-in pipeline variants.
//!
//! Every template starts at the control-plane `script` node. Training nodes
//! fan out from it in parallel, generation nodes form a chain, and the
//! render node joins whatever came before it.

use semver::Version;
use serde_json::{Map, Value, json};

use super::{PipelineMode, PipelineStage, PipelineTemplate};
use crate::graph::{Edge, Node, Plane};

/// Id of the script node every template starts with.
pub const SCRIPT_NODE_ID: &str = "script";

/// Task id of the script node.
pub const SCRIPT_TASK: &str = "script.generate_script";

const SCRIPT_WEIGHT: f64 = 0.1;

const SVD_WAV2LIP: &str = "svd_wav2lip";
const SADTALKER: &str = "sadtalker";
const F5TTS_INFINITETALK: &str = "f5tts_infinitetalk";

fn script_node() -> Node {
    Node::new(SCRIPT_NODE_ID, SCRIPT_TASK, Plane::Control)
        .with_name("Generate script")
        .with_weight(SCRIPT_WEIGHT)
}

fn worker_node(id: &str, name: &str, weight: f64, variant: &str) -> Node {
    let mut params = Map::new();
    params.insert("preset".to_owned(), Value::String(variant.to_owned()));
    Node::new(id, id, Plane::Worker)
        .with_name(name)
        .with_weight(weight)
        .with_params(params)
}

/// Lays out `script -> train* (parallel) -> generate* (chain) -> render`.
fn layout(
    variant: &str,
    mode: PipelineMode,
    label: &str,
    train: Vec<Node>,
    generate: Vec<Node>,
    render: Node,
) -> PipelineTemplate {
    let mut template = PipelineTemplate::new(variant, mode, label, Version::new(1, 0, 0))
        .with_node(script_node());

    let mut frontier = vec![SCRIPT_NODE_ID.to_owned()];
    if !train.is_empty() {
        for node in train {
            template = template.with_edge(Edge::new(SCRIPT_NODE_ID, node.id.clone()));
            template = template.with_stage_node(PipelineStage::Train, node);
        }
        frontier = template.nodes[1..]
            .iter()
            .map(|node| node.id.to_string())
            .collect();
    }

    for node in generate {
        for from in frontier.drain(..) {
            template = template.with_edge(Edge::new(from, node.id.clone()));
        }
        frontier.push(node.id.to_string());
        template = template.with_stage_node(PipelineStage::Generate, node);
    }

    for from in frontier {
        template = template.with_edge(Edge::new(from, render.id.clone()));
    }
    template.with_stage_node(PipelineStage::Render, render)
}

pub(super) fn templates() -> Vec<PipelineTemplate> {
    vec![
        layout(
            SVD_WAV2LIP,
            PipelineMode::TrainGenerate,
            "SVD + Wav2Lip",
            vec![
                worker_node("train_lora", "Train LoRA", 0.3, SVD_WAV2LIP),
                worker_node("train_voice", "Train voice (TTS)", 0.1, SVD_WAV2LIP),
            ],
            Vec::new(),
            worker_node("render_video", "Render video (SVD + Wav2Lip)", 0.4, SVD_WAV2LIP),
        ),
        layout(
            SVD_WAV2LIP,
            PipelineMode::Generate,
            "SVD + Wav2Lip",
            Vec::new(),
            Vec::new(),
            worker_node("render_video", "Render video (SVD + Wav2Lip)", 0.4, SVD_WAV2LIP),
        ),
        layout(
            SADTALKER,
            PipelineMode::TrainGenerate,
            "SadTalker",
            vec![worker_node(
                "train_voice",
                "Train voice (SadTalker)",
                0.3,
                SADTALKER,
            )],
            Vec::new(),
            worker_node("render_video", "Render video (SadTalker)", 0.6, SADTALKER),
        ),
        layout(
            SADTALKER,
            PipelineMode::Generate,
            "SadTalker",
            Vec::new(),
            Vec::new(),
            worker_node("render_video", "Render video (SadTalker)", 0.6, SADTALKER),
        ),
        layout(
            F5TTS_INFINITETALK,
            PipelineMode::Generate,
            "InfiniteTalk",
            Vec::new(),
            vec![
                worker_node(
                    "f5_to_tts",
                    "Generate voice (F5-TTS)",
                    0.15,
                    F5TTS_INFINITETALK,
                ),
                worker_node(
                    "infinite_talk",
                    "Generate speech video",
                    0.55,
                    F5TTS_INFINITETALK,
                ),
            ],
            worker_node(
                "render_video_infinitetalk",
                "Render video (WAN+InfiniteTalk)",
                0.2,
                F5TTS_INFINITETALK,
            ),
        ),
    ]
}

/// Default script-node input for a prompt.
pub(crate) fn script_input(prompt: &str) -> Value {
    json!({ "prompt": prompt })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edges_of(template: &PipelineTemplate) -> Vec<(String, String)> {
        template
            .edges
            .iter()
            .map(|e| (e.from.to_string(), e.to.to_string()))
            .collect()
    }

    #[test]
    fn training_fans_out_and_joins() {
        let template = &templates()[0];
        assert_eq!(
            edges_of(template),
            vec![
                ("script".into(), "train_lora".into()),
                ("script".into(), "train_voice".into()),
                ("train_lora".into(), "render_video".into()),
                ("train_voice".into(), "render_video".into()),
            ]
        );
    }

    #[test]
    fn generate_forms_reuse_the_render_node() {
        let templates = templates();
        for variant in [SVD_WAV2LIP, SADTALKER] {
            let render = |mode| {
                let template = templates
                    .iter()
                    .find(|t| t.variant == variant && t.mode == mode)
                    .unwrap();
                let id = template.stage_nodes(PipelineStage::Render).next().unwrap();
                template.nodes.iter().find(|n| &n.id == id).unwrap().clone()
            };
            assert_eq!(
                render(PipelineMode::Generate),
                render(PipelineMode::TrainGenerate)
            );
        }
    }

    #[test]
    fn stages_follow_the_layout() {
        let template = &templates()[4];
        let ids = |stage| {
            template
                .stage_nodes(stage)
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
        };
        assert!(ids(PipelineStage::Train).is_empty());
        assert_eq!(ids(PipelineStage::Generate), vec!["f5_to_tts", "infinite_talk"]);
        assert_eq!(ids(PipelineStage::Render), vec!["render_video_infinitetalk"]);
    }

    #[test]
    fn generation_forms_a_chain() {
        let template = &templates()[4];
        assert_eq!(
            edges_of(template),
            vec![
                ("script".into(), "f5_to_tts".into()),
                ("f5_to_tts".into(), "infinite_talk".into()),
                ("infinite_talk".into(), "render_video_infinitetalk".into()),
            ]
        );
    }
}
