//! Prompt 组装：把上游上下文变成确定性的 System 指令
//!
//! 主题自带模板时做占位符替换；没有模板时用内置默认 Prompt。
//! 无论模板怎么写，最终文本一定包含完成标记的指示，保证检测器的契约成立。

use crate::upstream::{TopicSpec, UserContext};

/// 模板支持的占位符：
/// {course_title} {topic_title} {topic_description} {learning_objectives}
/// {user_level} {completed_topics} {struggles} {completion_marker}
pub struct PromptBuilder {
    marker: String,
}

impl PromptBuilder {
    pub fn new(marker: impl Into<String>) -> Self {
        Self { marker: marker.into() }
    }

    /// 组装 System 指令。纯函数：同样的输入永远产出同样的文本。
    pub fn build(&self, topic: &TopicSpec, user: Option<&UserContext>) -> String {
        let level = render_level(user);
        let completed = render_completed_topics(user);
        let struggles = render_struggles(user);

        let mut prompt = match &topic.prompt_template {
            Some(template) if !template.trim().is_empty() => template
                .replace("{course_title}", &topic.course_title)
                .replace("{topic_title}", &topic.title)
                .replace("{topic_description}", &topic.description)
                .replace(
                    "{learning_objectives}",
                    topic.learning_objectives.as_deref().unwrap_or(""),
                )
                .replace("{user_level}", &level)
                .replace("{completed_topics}", &completed)
                .replace("{struggles}", &struggles)
                .replace("{completion_marker}", &self.marker),
            _ => self.default_prompt(topic, &level, &completed, &struggles),
        };

        // 模板作者漏掉 {completion_marker} 时补上显式指示，检测器才有东西可找
        if !prompt.contains(&self.marker) {
            prompt.push_str(&format!(
                "\n\nWhen the student demonstrates mastery of this topic, include the marker {} in your response.",
                self.marker
            ));
        }

        prompt
    }

    fn default_prompt(
        &self,
        topic: &TopicSpec,
        level: &str,
        completed: &str,
        struggles: &str,
    ) -> String {
        let objectives = match &topic.learning_objectives {
            Some(obj) if !obj.trim().is_empty() => format!("LEARNING OBJECTIVES:\n{}\n\n", obj),
            _ => String::new(),
        };

        format!(
            "You are an expert tutor specialized in {course}.\n\n\
             CURRENT TOPIC: {title}\n\n\
             TOPIC DESCRIPTION:\n{description}\n\n\
             {objectives}\
             STUDENT CONTEXT:\n\
             - Learning Level: {level}\n\
             - Completed Topics: {completed}\n\
             - Previous Difficulties: {struggles}\n\n\
             YOUR TEACHING APPROACH:\n\
             1. Start by explaining the concept clearly and concisely, adapting your explanation to the student's level\n\
             2. Provide practical, real-world examples that illustrate the concept\n\
             3. Ask 3 progressive questions to validate the student's understanding: comprehension, application, analysis\n\n\
             IMPORTANT INSTRUCTIONS:\n\
             - Adapt your language and examples to the student's {level} level\n\
             - Be encouraging and supportive; if the student struggles, provide hints rather than direct answers\n\
             - When the student correctly answers at least 2 out of 3 questions, include the marker {marker} in your response\n\
             - Do not move on to unrelated topics - stay focused on: {title}\n\n\
             Begin by introducing the topic and providing your explanation.",
            course = topic.course_title,
            title = topic.title,
            description = topic.description,
            objectives = objectives,
            level = level,
            completed = completed,
            struggles = struggles,
            marker = self.marker,
        )
    }
}

/// 用户水平走固定枚举映射，不透传上游原文
fn render_level(user: Option<&UserContext>) -> String {
    let Some(level) = user.and_then(|u| u.user_level.as_deref()) else {
        return "iniciante a intermediário".to_string();
    };

    match level.to_lowercase().as_str() {
        "beginner" | "novice" => "iniciante",
        "intermediate" => "intermediário",
        "advanced" | "expert" => "avançado",
        _ => "intermediário",
    }
    .to_string()
}

/// 空集合渲染为明确的「还没有」短语，不给模板留空串
fn render_completed_topics(user: Option<&UserContext>) -> String {
    match user.map(|u| u.completed_topic_ids.len()).unwrap_or(0) {
        0 => "nenhum tópico concluído ainda (este é o primeiro)".to_string(),
        1 => "1 tópico concluído anteriormente".to_string(),
        n => format!("{} tópicos concluídos anteriormente", n),
    }
}

fn render_struggles(user: Option<&UserContext>) -> String {
    let struggles = user.map(|u| u.struggle_topics.as_slice()).unwrap_or(&[]);
    if struggles.is_empty() {
        return "nenhuma dificuldade registrada".to_string();
    }
    struggles
        .iter()
        .take(3)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
