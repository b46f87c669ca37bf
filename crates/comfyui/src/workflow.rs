//! txt2img workflow graph in ComfyUI's API format.
//!
//! The graph is the stock seven-node pipeline:
//! checkpoint loader, positive and negative text encoders, empty latent,
//! KSampler, VAE decode and SaveImage. Node ids are fixed so the sampler
//! and output node can be recognised in history responses.

use imagine_core::types::JobId;
use serde_json::{json, Value};

pub const NODE_CHECKPOINT: &str = "4";
pub const NODE_POSITIVE: &str = "6";
pub const NODE_NEGATIVE: &str = "7";
pub const NODE_LATENT: &str = "5";
pub const NODE_SAMPLER: &str = "3";
pub const NODE_DECODE: &str = "8";
pub const NODE_SAVE: &str = "9";

/// Parameters for one txt2img run.
#[derive(Debug, Clone, PartialEq)]
pub struct Txt2ImgParams {
    pub checkpoint: String,
    pub prompt: String,
    pub negative_prompt: String,
    pub steps: u32,
    pub cfg: f64,
    pub seed: u64,
    pub width: u32,
    pub height: u32,
    pub sampler: String,
    pub scheduler: String,
    pub filename_prefix: String,
}

/// Build the workflow JSON submitted to `POST /prompt`.
pub fn build_txt2img(params: &Txt2ImgParams) -> Value {
    json!({
        NODE_CHECKPOINT: {
            "class_type": "CheckpointLoaderSimple",
            "inputs": { "ckpt_name": params.checkpoint }
        },
        NODE_POSITIVE: {
            "class_type": "CLIPTextEncode",
            "inputs": { "text": params.prompt, "clip": [NODE_CHECKPOINT, 1] }
        },
        NODE_NEGATIVE: {
            "class_type": "CLIPTextEncode",
            "inputs": { "text": params.negative_prompt, "clip": [NODE_CHECKPOINT, 1] }
        },
        NODE_LATENT: {
            "class_type": "EmptyLatentImage",
            "inputs": { "width": params.width, "height": params.height, "batch_size": 1 }
        },
        NODE_SAMPLER: {
            "class_type": "KSampler",
            "inputs": {
                "seed": params.seed,
                "steps": params.steps,
                "cfg": params.cfg,
                "sampler_name": params.sampler,
                "scheduler": params.scheduler,
                "denoise": 1.0,
                "model": [NODE_CHECKPOINT, 0],
                "positive": [NODE_POSITIVE, 0],
                "negative": [NODE_NEGATIVE, 0],
                "latent_image": [NODE_LATENT, 0]
            }
        },
        NODE_DECODE: {
            "class_type": "VAEDecode",
            "inputs": { "samples": [NODE_SAMPLER, 0], "vae": [NODE_CHECKPOINT, 2] }
        },
        NODE_SAVE: {
            "class_type": "SaveImage",
            "inputs": { "filename_prefix": params.filename_prefix, "images": [NODE_DECODE, 0] }
        }
    })
}

/// A seed in ComfyUI's accepted range, derived from a job id so reruns of
/// the same job are reproducible.
pub fn seed_from_job_id(job_id: JobId) -> u64 {
    let (hi, lo) = job_id.as_u64_pair();
    (hi ^ lo) & 0xFFFF_FFFF_FFFF
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> Txt2ImgParams {
        Txt2ImgParams {
            checkpoint: "sd_xl_turbo_1.0_fp16.safetensors".into(),
            prompt: "a cat".into(),
            negative_prompt: "blurry".into(),
            steps: 20,
            cfg: 7.0,
            seed: 42,
            width: 512,
            height: 512,
            sampler: "euler".into(),
            scheduler: "normal".into(),
            filename_prefix: "imagine".into(),
        }
    }

    #[test]
    fn workflow_carries_parameters() {
        let wf = build_txt2img(&params());
        assert_eq!(wf[NODE_CHECKPOINT]["inputs"]["ckpt_name"], "sd_xl_turbo_1.0_fp16.safetensors");
        assert_eq!(wf[NODE_POSITIVE]["inputs"]["text"], "a cat");
        assert_eq!(wf[NODE_NEGATIVE]["inputs"]["text"], "blurry");
        assert_eq!(wf[NODE_SAMPLER]["inputs"]["steps"], 20);
        assert_eq!(wf[NODE_SAMPLER]["inputs"]["seed"], 42);
        assert_eq!(wf[NODE_LATENT]["inputs"]["width"], 512);
    }

    #[test]
    fn every_link_points_at_an_existing_node() {
        let wf = build_txt2img(&params());
        let nodes = wf.as_object().unwrap();
        for (id, node) in nodes {
            for (input, value) in node["inputs"].as_object().unwrap() {
                if let Some(link) = value.as_array() {
                    let target = link[0].as_str().unwrap();
                    assert!(nodes.contains_key(target), "{id}.{input} -> {target}");
                }
            }
        }
    }

    #[test]
    fn seed_is_stable_and_bounded() {
        let id = imagine_core::types::new_job_id();
        assert_eq!(seed_from_job_id(id), seed_from_job_id(id));
        assert!(seed_from_job_id(id) < (1 << 48));
    }
}
