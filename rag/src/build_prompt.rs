use crate::document::ScoredChunk;

/// Sent in place of the context block when retrieval found nothing.
pub const NO_CONTEXT: &str = "(no relevant documents found)";

/// The section headings every answer is asked to contain, in order.
pub const ANSWER_SECTIONS: [&str; 4] = [
    "Summary",
    "Key Insights",
    "Recommendations",
    "Skills Assessment",
];

/// Returns the filled prompt and the context block it was built from.
pub fn build_prompt_with_context(question: &str, hits: &[ScoredChunk]) -> (String, String) {
    let context = format_context_from_hits(hits);
    (build_prompt(&context, question), context)
}

/// Chunk texts in retrieval order, separated by a blank line.
pub fn format_context_from_hits(hits: &[ScoredChunk]) -> String {
    if hits.is_empty() {
        return NO_CONTEXT.to_string();
    }
    hits.iter()
        .map(|hit| hit.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn build_prompt(context: &str, question: &str) -> String {
    format!(
        "You are an expert HR analyst. Analyze the following question using the provided context.

Context: {context}

Question: {question}

Format your response in markdown with:
## {summary}
[Executive summary]

## {insights}
- [Key finding 1]
- [Key finding 2]

## {recommendations}
1. [Recommendation 1]
2. [Recommendation 2]

## {skills}
[Skills alignment if relevant]

Focus on HR factors like skills, experience, qualifications, and cultural fit.
",
        context = context,
        question = question,
        summary = ANSWER_SECTIONS[0],
        insights = ANSWER_SECTIONS[1],
        recommendations = ANSWER_SECTIONS[2],
        skills = ANSWER_SECTIONS[3],
    )
}
