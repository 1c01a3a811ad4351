//! Prompts for the text optimization pass.

use std::path::Path;
use tracing::warn;

/// Used when no prompt file is present. Speech is transcribed as Chinese by
/// default, so the instructions are too.
pub const DEFAULT_SYSTEM_PROMPT: &str = "你是一个专业的文本优化助手。你的任务是优化语音识别结果，使其更加通顺、准确。

请遵循以下规则：
1. 去除重复的内容、口癖和语气词（如\"嗯\"、\"啊\"、\"那个\"、\"然后\"等）
2. 修正语义模糊的表达，使其更加清晰准确
3. 适当分段和格式化，提高可读性
4. 保持原文的核心意思不变，不要添加原文中没有的信息
5. 修正可能的同音字错误
6. 保持礼貌和专业性

请直接返回优化后的文本，不需要解释修改内容。";

/// Read the system prompt. The file is re-read on every call so edits apply
/// without a restart.
pub fn load_system_prompt(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
        Ok(_) => DEFAULT_SYSTEM_PROMPT.to_string(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => DEFAULT_SYSTEM_PROMPT.to_string(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read prompt file, using default");
            DEFAULT_SYSTEM_PROMPT.to_string()
        }
    }
}

/// Wrap transcribed text in the user message.
pub fn optimization_request(text: &str) -> String {
    format!("请优化以下文本：\n\n{}", text)
}
