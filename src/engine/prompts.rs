//! Prompt construction for the generative text model

use std::collections::HashMap;

/// Report kind requested through `process_batch`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    Summarize,
    Interview,
}

impl BatchMode {
    pub fn parse(mode: &str) -> Option<Self> {
        match mode {
            "summarize" => Some(Self::Summarize),
            "interview" => Some(Self::Interview),
            _ => None,
        }
    }
}

/// Prompt asking for a fluent, colloquial translation of live speech
pub fn translation_prompt(
    text: &str,
    target_language: &str,
    names: &HashMap<String, String>,
) -> String {
    if target_language == "zh-TW" {
        return format!(
            "You are an expert translator specializing in Taiwanese Mandarin (Traditional Chinese).\n\
             Translate the following spoken input into natural, colloquial, and idiomatic \
             Taiwanese Mandarin (Traditional Chinese).\n\
             The input may be fragmented, contain pauses, or have ungrammatical phrasing due to real-time speech.\n\
             Produce a fluent and contextually accurate translation. Do not use Simplified Chinese characters, \
             Cantonese colloquialisms, or overly formal language.\n\n\
             Input speech: '{text}'\n\n\
             Provide ONLY the translated sentence in Traditional Chinese, without explanations, \
             notes, or introductory phrases.\n\
             Translated sentence:"
        );
    }

    let target_name = names
        .get(target_language)
        .map(String::as_str)
        .unwrap_or("the target language");

    format!(
        "You are an expert in oral translation. Translate the user's input into natural, \
         colloquial {target_name}. The input might be fragmented or ungrammatical because it comes \
         from real-time speech. Refine it and provide a fluent translation. \
         Input: '{text}'\n\
         Return only the translated sentence, without any explanation or extra text."
    )
}

/// Prompt for a batch report over a full transcript
pub fn batch_prompt(
    transcript: &str,
    mode: BatchMode,
    source_language: &str,
    names: &HashMap<String, String>,
) -> String {
    let source_name = names
        .get(source_language)
        .map(String::as_str)
        .unwrap_or(source_language);

    match mode {
        BatchMode::Summarize => format!(
            "You are a professional meeting assistant. The following is a transcript of a meeting in {source_name}. \
             Provide a concise summary of the meeting. Identify key decisions made and action items for participants.\
             \n\nTranscript:\n\n{transcript}\n\nSummary:"
        ),
        BatchMode::Interview => format!(
            "You are an expert interview coach. The following is a transcript of a job interview. \
             The candidate's responses are in {source_name}. Analyze the candidate's responses. \
             Give constructive feedback on their communication skills, the clarity of their answers, \
             and the overall impression they made, with specific areas for improvement. \
             Structure the feedback into sections: Strengths, Areas for Improvement, and Key Takeaways.\
             \n\nInterview Transcript:\n\n{transcript}\n\nFeedback:"
        ),
    }
}

/// Prompt for quick interview coaching on a transcript still in progress
pub fn coaching_prompt(transcript: &str, language: &str) -> String {
    format!(
        "You are a professional interview coach. From the point of view of a senior interviewer, \
         analyze the following interview conversation and give three concrete suggestions that \
         will immediately help the candidate make a better impression.\n\n\
         Interview conversation:\n{transcript}\n\n\
         Answer in {language}, in no more than five sentences."
    )
}

/// Prompt for a plain summary of a transcript, written in its own language
pub fn summary_prompt(transcript: &str, language: &str) -> String {
    format!(
        "You are a professional assistant tasked with summarizing a discussion. \
         The following text is a transcript of a conversation in {language}. \
         Please provide a concise, easy-to-read summary of the key points, decisions, and action items. \
         The summary should be in {language}.\n\n\
         Transcript:\n==========\n{transcript}\n==========\n\n\
         Summary:"
    )
}
