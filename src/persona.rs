//! Persona configuration
//!
//! Everything that varies between advisor personas lives here: model id,
//! system prompt, whether retrieved letters are folded into the prompt, and
//! the voice used for the single failure message. The tool set is held by
//! the registry, not the persona.

/// Configuration for one advisor persona.
#[derive(Debug, Clone)]
pub struct Persona {
    pub name: &'static str,
    pub model: &'static str,
    pub system_prompt: &'static str,
    /// When true, similar shareholder-letter chunks are retrieved for the
    /// pending question and appended to the system instruction.
    pub use_knowledge: bool,
    pub knowledge_header: &'static str,
    pub error_prefix: &'static str,
}

impl Persona {
    /// The Warren Buffett persona (Korean voice), knowledge-augmented.
    pub fn buffett() -> Self {
        Self {
            name: "warren-buffett",
            model: "gemini-2.0-flash",
            system_prompt: "당신은 통찰력 넘치는 워렌 버핏입니다. 말투는 '~하네', '~구먼'같은 인자한 말투를 사용하세요. \
                1. 도구 활용 규칙: 주가나 재무제표처럼 정확한 최신 수치가 필요한 경우에만 도구를 호출하세요. \
                그 수치가 의미하는 바를 투자 철학에 빗대어 설명하고, 옆에 그 수치를 같이 적어주세요. \
                매출액이나 현금 등 숫자를 보여줄 때 20000000000달러처럼 그대로 보여주지 말고 200억달러 이런식으로 보여주세요. \
                2. 기본 지식 활용: 기업의 CEO 이름, 창립 역사, 일반적인 비즈니스 모델 등 이미 알고 있는 상식은 도구 호출 없이 즉시 답변하세요. \
                3. 도구 사용 중 오류: 만약 도구에서 에러가 나거나 정보를 가져오지 못하더라도, 알고 있는 지식을 바탕으로 최대한 버핏의 관점에서 조언을 건네세요. \
                절대로 '도구가 없어서 모른다'고 하지 마세요. \
                4. 분석 스타일: 데이터를 나열하지 말고, 상대에게 이야기하듯 투자 철학을 섞어서 설명하세요. \
                5. 사용자가 기업을 물어보면 먼저 'get_current_stock_summary'를 호출하여 현재 상태를 보고하세요. \
                6. 사용자가 과거 추이를 요구할 때만 'get_historical_financial_trends'를 호출하세요. \
                7. 답변할 때는 항상 현재 주가와 시황을 우선적으로 언급하고, 과거 데이터는 현재를 설명하기 위한 보조 수단으로만 활용하세요.",
            use_knowledge: true,
            knowledge_header: "참고할 주주서한 발췌문:",
            error_prefix: "에러가 발생했네: ",
        }
    }

    /// Final system instruction for one request. Retrieved context is
    /// appended only when augmentation is on and retrieval produced text.
    pub fn system_instruction(&self, knowledge_context: &str) -> String {
        if !self.use_knowledge || knowledge_context.is_empty() {
            return self.system_prompt.to_string();
        }
        format!(
            "{}\n\n{}\n{}",
            self.system_prompt, self.knowledge_header, knowledge_context
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_instruction_without_context() {
        let persona = Persona::buffett();
        let instruction = persona.system_instruction("");
        assert_eq!(instruction, persona.system_prompt);
    }

    #[test]
    fn test_system_instruction_with_context() {
        let persona = Persona::buffett();
        let instruction = persona.system_instruction("1988년 주주서한 발췌");
        assert!(instruction.starts_with(persona.system_prompt));
        assert!(instruction.contains(persona.knowledge_header));
        assert!(instruction.ends_with("1988년 주주서한 발췌"));
    }

    #[test]
    fn test_context_ignored_when_augmentation_off() {
        let persona = Persona {
            use_knowledge: false,
            ..Persona::buffett()
        };
        let instruction = persona.system_instruction("발췌문");
        assert_eq!(instruction, persona.system_prompt);
    }
}
