//! Prompt assembly for the support chat model.

use llm_client::Message;

/// Marker token the model is told to use when citing an image. Must match
/// what the extractor is configured to look for.
pub const IMAGE_MARKER: &str = "이미지";

/// Builds the message list for one chat turn: a system prompt carrying the
/// retrieved context and citation rules, prior turns verbatim, then the
/// current question. `image_url_prefix` is the allow-listed storage prefix;
/// the model is told to cite nothing outside it.
pub fn build_messages(
    context: &str,
    history: &[Message],
    query: &str,
    image_url_prefix: &str,
) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(Message::system(system_prompt(context, image_url_prefix)));
    messages.extend(history.iter().cloned());
    messages.push(Message::user(query));
    messages
}

fn system_prompt(context: &str, image_url_prefix: &str) -> String {
    let prefix = image_url_prefix.trim_end_matches('/');
    format!(
        "당신은 제품 사용을 돕는 친절한 상담원입니다. 아래 매뉴얼 발췌를 근거로 \
         한국어로 정확하게 답변하세요. 발췌에 없는 내용은 추측하지 말고 모른다고 \
         말하세요.\n\n\
         이미지를 안내할 때는 반드시 다음 형식을 지키세요. 본문 중 해당 위치에 \
         [{IMAGE_MARKER} 1] 처럼 번호를 매긴 표시를 쓰고, 바로 다음 줄에 이미지 URL만 \
         단독으로 적으세요. URL은 반드시 {prefix}/ 로 시작해야 하며, URL 앞에 @ 를 \
         붙이지 말고, URL 끝에 ? 를 남기지 말고, 경로의 슬래시를 겹쳐 쓰지 마세요. 예:\n\
         [{IMAGE_MARKER} 1]\n\
         {prefix}/sample.jpg\n\n\
         매뉴얼 발췌:\n{context}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX: &str = "https://img.example.com/manual/";

    #[test]
    fn system_prompt_comes_first_and_carries_context() {
        let messages = build_messages("[p.3] 카메라 여는 법", &[], "카메라 어떻게 켜요?", PREFIX);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert!(messages[0].content.contains("[p.3] 카메라 여는 법"));
        assert_eq!(messages[1].role, "user");
        assert_eq!(messages[1].content, "카메라 어떻게 켜요?");
    }

    #[test]
    fn history_is_preserved_between_system_and_query() {
        let history = vec![Message::user("안녕"), Message::assistant("안녕하세요!")];
        let messages = build_messages("ctx", &history, "다음 질문", PREFIX);
        let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, ["system", "user", "assistant", "user"]);
    }

    #[test]
    fn citation_format_mentions_the_marker() {
        let messages = build_messages("ctx", &[], "q", PREFIX);
        assert!(messages[0].content.contains(&format!("[{IMAGE_MARKER} 1]")));
    }

    #[test]
    fn citation_rules_carry_the_allow_listed_prefix() {
        let messages = build_messages("ctx", &[], "q", PREFIX);
        let prompt = &messages[0].content;
        // The example URL the model will imitate must itself pass the
        // extractor's allow-list.
        assert!(prompt.contains("https://img.example.com/manual/sample.jpg"));
        assert!(prompt.contains("https://img.example.com/manual/ 로 시작"));
        assert!(prompt.contains("@ 를"));
        assert!(prompt.contains("? 를"));
        assert!(prompt.contains("슬래시"));
    }
}
