use crate::interview::models::InterviewSetup;

/// System prompt for the interview coach. Replies are read aloud, so it asks
/// for plain, symbol-free prose.
pub const INTERVIEW_COACH_SYSTEM: &str = "\
You are an Expert Interview Coach and Hiring Manager with 15+ years of experience. Your role is to:

1. Conduct realistic mock interviews: ask industry-appropriate questions based on job role, \
experience level and company type, follow a natural interview flow with follow-up questions, \
adapt difficulty to the candidate's answers, and mix behavioral, technical, situational and \
cultural-fit questions.

2. Provide detailed feedback: rate answers on content, clarity, confidence and relevance on a \
1-10 scale, give specific improvement suggestions, highlight strengths and areas to develop, \
and suggest better ways to structure answers (STAR method for behavioral questions).

3. Question categories: opening (tell me about yourself, why this role), behavioral (tell me \
about a time when), technical (role-specific skills), situational (what would you do if), \
closing (questions for us, why should we hire you).

Always maintain a professional, encouraging tone. Keep the interview realistic and matched to \
the expectations of real hiring managers.

Important: your response will be read aloud by a speech service, so avoid symbols such as \
exclamation marks, hashes and slashes.";

pub const OPENING_QUESTION_PROMPT: &str =
    "Please start the interview with an appropriate opening question.";

/// Role, level and company block appended to the coach prompt.
pub fn job_context(setup: &InterviewSetup) -> String {
    format!(
        "Interview Context:\n\
         - Job Role: {}\n\
         - Experience Level: {}\n\
         - Company Type: {}\n\
         - Interview Mode: {}\n\n\
         Please conduct an interview appropriate for this role and level. Start with an opening question.",
        setup.job_role.trim(),
        setup.experience_level.trim(),
        setup.company_type.trim(),
        setup.mode.describe(),
    )
}

pub fn system_prompt(setup: &InterviewSetup) -> String {
    format!("{INTERVIEW_COACH_SYSTEM}\n{}", job_context(setup))
}

/// Asks for feedback on `answer` followed by the next question.
pub fn feedback_prompt(answer: &str) -> String {
    format!(
        "Please provide detailed feedback on this response and then ask the next appropriate interview question.\n\
         Your response will be read aloud, so don't use symbols like #, ? or / or any other non-verbal characters.\n\
         Response to evaluate: \"{answer}\"\n\n\
         Include:\n\
         1. Feedback with score (1-10) for content, clarity, and overall effectiveness\n\
         2. Specific improvement suggestions\n\
         3. What they did well\n\
         4. Next interview question appropriate for the flow"
    )
}
