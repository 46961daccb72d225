//! 完成检测：扫描 AI 回复中的完成标记
//!
//! 标记仅供内部状态转换使用，返回用户前必须剥离。纯函数、不会失败。

/// 一次检测的结果：剥离标记后的文本与是否判定完成
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub cleaned: String,
    pub completed: bool,
}

/// 标记出现即判定完成；cleaned 为移除所有标记、相邻空白折叠为单个空格并 trim 后的文本。
/// 文本不含标记时原样返回（completed = false），因此对已清洗文本幂等。
pub fn detect(text: &str, marker: &str) -> Detection {
    if marker.is_empty() || !text.contains(marker) {
        return Detection {
            cleaned: text.to_string(),
            completed: false,
        };
    }

    let cleaned = text
        .split(marker)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    Detection {
        cleaned,
        completed: true,
    }
}
