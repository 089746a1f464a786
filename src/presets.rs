//! Well-known model ids, grouped by vendor, for pickers and `presets`.

use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ModelPreset {
    pub label: &'static str,
    pub value: &'static str,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PresetGroup {
    pub vendor: &'static str,
    pub models: &'static [ModelPreset],
}

const fn preset(label: &'static str, value: &'static str) -> ModelPreset {
    ModelPreset { label, value }
}

pub static MODEL_PRESETS: &[PresetGroup] = &[
    PresetGroup {
        vendor: "Google Gemini",
        models: &[
            preset("Gemini 2.0 Flash Exp", "gemini-2.0-flash-exp"),
            preset("Gemini 1.5 Pro", "gemini-1.5-pro"),
            preset("Gemini 1.5 Flash", "gemini-1.5-flash"),
            preset("Gemini 1.5 Flash 8B", "gemini-1.5-flash-8b"),
            preset("Gemini 2.5 Flash (Preview)", "gemini-2.5-flash"),
        ],
    },
    PresetGroup {
        vendor: "OpenAI",
        models: &[
            preset("GPT-4o", "gpt-4o"),
            preset("GPT-4o Mini", "gpt-4o-mini"),
            preset("o1 Preview", "o1-preview"),
            preset("o1 Mini", "o1-mini"),
            preset("GPT-4 Turbo", "gpt-4-turbo"),
            preset("GPT-3.5 Turbo", "gpt-3.5-turbo"),
        ],
    },
    PresetGroup {
        vendor: "Anthropic",
        models: &[
            preset("Claude 3.5 Sonnet", "claude-3-5-sonnet-latest"),
            preset("Claude 3.5 Haiku", "claude-3-5-haiku-latest"),
            preset("Claude 3 Opus", "claude-3-opus-latest"),
        ],
    },
    PresetGroup {
        vendor: "DeepSeek / Open Source",
        models: &[
            preset("DeepSeek Chat (V3)", "deepseek-chat"),
            preset("DeepSeek Reasoner (R1)", "deepseek-reasoner"),
            preset("Llama 3.1 70B", "llama-3.1-70b-instruct"),
            preset("Llama 3.1 8B", "llama-3.1-8b-instruct"),
        ],
    },
];

/// Look up a preset by model id.
pub fn find(model: &str) -> Option<&'static ModelPreset> {
    MODEL_PRESETS
        .iter()
        .flat_map(|g| g.models.iter())
        .find(|m| m.value == model)
}
