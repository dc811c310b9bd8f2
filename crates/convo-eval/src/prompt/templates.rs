//! Fixed prompt text.
//!
//! Hosted chat models get the "short phrase" wording; open-weight chat models
//! get the "few words" wording, which keeps small models from writing full
//! sentences.

/// Option text that stands for "the conversation does not say".
pub const NO_INFORMATION: &str = "No information available";

/// Appended to temporal questions.
pub const TEMPORAL_HINT: &str = " Use DATE of CONVERSATION to answer with an approximate date.";

/// System message for chat families that take one.
pub const CHAT_SYSTEM_MESSAGE: &str = "\
You are a helpful, respectful and honest assistant whose job is to understand \
the following conversation and answer questions based on the conversation. \
If you don't know the answer to a question, please don't share false information.";

/// Instruction block that precedes the numbered questions of a batch.
pub const BATCH_INSTRUCTIONS: &str = "
Based on the above conversations, write short answers for each of the following questions in a few words.
Write the answers in the form of a json dictionary where each entry contains the question number as \"key\" and the short answer as \"value\".
Use single-quote characters for named entities and double-quote characters for enclosing json elements. Answer with exact words from the conversations whenever possible.

";

/// Wording of the single-question template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionStyle {
    /// "Write an answer in the form of a short phrase."
    ShortPhrase,
    /// "Write a short answer in a few words."
    FewWords,
}

/// Render one question with the template for `style`.
///
/// Forced-choice questions already carry their options and instructions, so
/// the short-phrase style drops the exact-words nudge for them.
pub fn single_question(style: QuestionStyle, question: &str, forced_choice: bool) -> String {
    match (style, forced_choice) {
        (QuestionStyle::ShortPhrase, false) => format!(
            "\nBased on the above context, write an answer in the form of a short phrase \
             for the following question. Answer with exact words from the context whenever \
             possible.\n\nQuestion: {question} Short answer:\n"
        ),
        (QuestionStyle::ShortPhrase, true) => format!(
            "\nBased on the above context, answer the following question.\n\n\
             Question: {question} Short answer:\n"
        ),
        (QuestionStyle::FewWords, _) => format!(
            "\nBased on the above conversations, write a short answer for the following \
             question in a few words. Do not write complete and lengthy sentences. Answer \
             with exact words from the conversations whenever possible.\n\nQuestion: {question}\n"
        ),
    }
}

/// Render the numbered question block for a batch: the instructions, then
/// one `"{k}: {question}"` line per question.
pub fn batch_questions<S: AsRef<str>>(questions: &[S]) -> String {
    let lines: Vec<String> = questions
        .iter()
        .enumerate()
        .map(|(k, q)| format!("{k}: {}", q.as_ref()))
        .collect();
    format!("{BATCH_INSTRUCTIONS}{}", lines.join("\n"))
}

/// Opening line naming the two participants.
pub fn conversation_preamble(speaker_a: &str, speaker_b: &str) -> String {
    format!(
        "Below is a conversation between two people: {speaker_a} and {speaker_b}. \
         The conversation takes place over multiple days and the date of each \
         conversation is written at the beginning of the conversation.\n\n"
    )
}

/// Options appended to a forced-choice question.
pub fn forced_choice_suffix(option_a: &str, option_b: &str) -> String {
    format!(" (a) {option_a} (b) {option_b}. Select the correct answer by writing (a) or (b).")
}
