//! Blog content flow
//!
//! Research a topic, draft a post, and loop through SEO review until the
//! score clears the pass mark. Each failed review emits `remake`, which
//! re-activates the writer with the reviewer's reasoning.

use super::{CatalogError, required_text, with_deps};
use crate::agent::{Agent, AgentTask, ScriptedAgent};
use crate::artifacts::ArtifactStore;
use crate::config::BlogSettings;
use crate::engine::{Flow, Step, StepContext, StepError, StepOutput, Trigger};
use crate::prompt::PromptRenderer;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

pub const ROLE_RESEARCHER: &str = "senior researcher";
pub const ROLE_WRITER: &str = "SEO blog writer";
pub const ROLE_SEO: &str = "SEO specialist";

pub const LABEL_REMAKE: &str = "remake";

const MAX_SCORE: u32 = 100;

const RESEARCH_PROMPT: &str = r#"
Research the topic '{{ topic }}' with a focus on:

1. Recent developments and trends from the last year
2. Scientific or technical evidence: credible studies and expert opinion
3. Practical applications and case studies
4. Future outlook and expected alternatives
5. Plain-language explanations of the key terminology

Cite a source and a confidence level for each finding.
"#;

const DRAFT_PROMPT: &str = r#"
Write a high quality, SEO-optimized blog post about '{{ topic }}' based on the research below.

Structure:
- Introduction: why the topic matters right now
- Body: 3-4 sub-topics explained in order
- Conclusion: key insights and practical takeaways

SEO:
- Title under 60 characters, containing the main keyword
- Keywords placed naturally throughout
- At most {{ max_length }} characters of content

Reply with JSON only:
{"title": "...", "content": "...", "hashtags": ["keyword1", "keyword2", "keyword3"]}

<research>
{{ research_data }}
</research>
"#;

const REVISE_PROMPT: &str = r#"
An SEO review found that the blog post about '{{ topic }}' needs work (revision {{ revision }}).
Reviewer score: {{ score.score }}/100
Reviewer analysis: {{ score.reason }}

Rewrite the post:
1. Make the title more specific and search friendly
2. Restructure the content into a clear logical flow
3. Add practical information and insight
4. Place the main keywords naturally
Keep the content within {{ max_length }} characters.

Reply with JSON only:
{"title": "...", "content": "...", "hashtags": ["keyword1", "keyword2", "keyword3"]}

<post>
{{ post | json }}
</post>

<research>
{{ research_data }}
</research>
"#;

const SEO_PROMPT: &str = r#"
Evaluate this blog post for SEO quality. Score each area out of 25:

1. Keyword optimization: placement, density, related terms
2. Title and structure: search friendliness, heading hierarchy, logical flow
3. Content quality and length: accuracy, depth, originality
4. Readability: sentence length, paragraphing, match with search intent

Target topic: {{ topic }}

<post>
{{ post | json }}
</post>

Reply with JSON only, where score is the 0-100 total and reason names the
main factors and the top three improvements:
{"score": 0, "reason": "..."}
"#;

/// A blog post as produced by the writer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub title: String,
    pub content: String,
    #[serde(default, alias = "hashtag")]
    pub hashtags: Vec<String>,
}

/// SEO reviewer verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreCard {
    #[serde(default)]
    pub score: u32,
    #[serde(default)]
    pub reason: String,
}

struct BlogDeps {
    agent: Arc<dyn Agent>,
    artifacts: Arc<dyn ArtifactStore>,
    prompts: PromptRenderer,
    settings: BlogSettings,
}

fn prompts() -> Result<PromptRenderer, CatalogError> {
    Ok(PromptRenderer::new()
        .with("research", RESEARCH_PROMPT)?
        .with("draft", DRAFT_PROMPT)?
        .with("revise", REVISE_PROMPT)?
        .with("seo", SEO_PROMPT)?)
}

/// Assemble the blog content flow
pub fn build(
    agent: Arc<dyn Agent>,
    artifacts: Arc<dyn ArtifactStore>,
    settings: BlogSettings,
) -> Result<Flow, CatalogError> {
    let deps = Arc::new(BlogDeps {
        agent,
        artifacts,
        prompts: prompts()?,
        settings,
    });

    let flow = Flow::builder("blog")
        .description("Research, draft and SEO-review a blog post until it passes")
        .step(
            Step::new("init_make_blog_content", Trigger::on_start(), init_make_blog_content)
                .describe("Check the topic"),
        )
        .step(
            Step::new(
                "research_by_topic",
                Trigger::on_complete("init_make_blog_content"),
                with_deps(&deps, research_by_topic),
            )
            .writes(["research_data"]),
        )
        .step(
            Step::new(
                "handle_make_blog",
                Trigger::on_complete("research_by_topic").or(Trigger::on_label(LABEL_REMAKE)),
                with_deps(&deps, handle_make_blog),
            )
            .writes(["post", "revision"])
            .describe("Draft the post, or revise it after a failed review"),
        )
        .step(
            Step::new(
                "manage_seo",
                Trigger::on_complete("handle_make_blog"),
                with_deps(&deps, manage_seo),
            )
            .writes(["score"]),
        )
        .step(
            Step::router(
                "manage_score_router",
                Trigger::on_complete("manage_seo"),
                [LABEL_REMAKE],
                with_deps(&deps, manage_score_router),
            )
            .writes(["artifact"])
            .describe("Publish a passing post or send it back for another revision"),
        )
        .build()?;

    Ok(flow)
}

async fn init_make_blog_content(ctx: StepContext) -> Result<StepOutput, StepError> {
    required_text(&ctx, "topic", "topic")?;
    Ok(StepOutput::new())
}

async fn research_by_topic(deps: Arc<BlogDeps>, ctx: StepContext) -> Result<StepOutput, StepError> {
    let topic = required_text(&ctx, "topic", "topic")?;
    let prompt = deps.prompts.render("research", &ctx.snapshot())?;
    let task = AgentTask::new(ROLE_RESEARCHER, prompt).with_goal(format!(
        "Gather recent trends, evidence and practical uses of {} that give readers real insight",
        topic
    ));

    let reply = deps.agent.complete(&task).await?;
    tracing::info!(chars = reply.text.len(), "Research collected");
    Ok(StepOutput::new().set("research_data", reply.text)?)
}

async fn handle_make_blog(deps: Arc<BlogDeps>, ctx: StepContext) -> Result<StepOutput, StepError> {
    let previous: Option<u32> = ctx.get_opt("revision")?;
    let revision = previous.map_or(1, |r| r + 1);

    let mut vars = ctx.snapshot();
    if vars.get("max_length").is_none() {
        vars["max_length"] = json!(deps.settings.max_length());
    }
    vars["revision"] = json!(revision);

    let template = if ctx.contains("post") { "revise" } else { "draft" };
    let prompt = deps.prompts.render(template, &vars)?;
    let task = AgentTask::new(ROLE_WRITER, prompt)
        .with_goal("Write an engaging, well structured post that ranks well in search");

    let post: Post = deps.agent.complete(&task).await?.json()?;
    tracing::info!(revision, title = %post.title, "Post written");

    Ok(StepOutput::new()
        .set("post", post)?
        .set("revision", revision)?)
}

async fn manage_seo(deps: Arc<BlogDeps>, ctx: StepContext) -> Result<StepOutput, StepError> {
    let prompt = deps.prompts.render("seo", &ctx.snapshot())?;
    let task = AgentTask::new(ROLE_SEO, prompt)
        .with_goal("Rate the post's search engine optimization strictly and give actionable feedback");

    let mut card: ScoreCard = deps.agent.complete(&task).await?.json()?;
    card.score = card.score.min(MAX_SCORE);
    tracing::info!(score = card.score, "SEO review");

    Ok(StepOutput::new().set("score", card)?)
}

async fn manage_score_router(deps: Arc<BlogDeps>, ctx: StepContext) -> Result<StepOutput, StepError> {
    let card: ScoreCard = ctx.get("score")?;
    let revision: u32 = ctx.get("revision")?;
    let pass_score = deps.settings.pass_score();

    if card.score < pass_score {
        match deps.settings.max_revisions {
            Some(max) if revision >= max => {
                tracing::warn!(revision, score = card.score, pass_score, "Revision limit reached, publishing anyway");
            }
            _ => {
                tracing::info!(revision, score = card.score, pass_score, "Score below pass mark, revising");
                return Ok(StepOutput::new().route(LABEL_REMAKE));
            }
        }
    }

    let topic: String = ctx.get("topic")?;
    let post: Post = ctx.get("post")?;
    let now = Local::now();
    let file_name = format!("{}_{}.md", topic, now.format("%Y%m%d%H%M%S"));

    let path = deps
        .artifacts
        .save(&file_name, &render_markdown(&post, &topic, &card, now))
        .await?;
    let path = path.display().to_string();

    Ok(StepOutput::new()
        .set("artifact", &path)?
        .value(&path)?
        .terminate())
}

/// Markdown document for a published post
pub fn render_markdown(post: &Post, topic: &str, card: &ScoreCard, at: DateTime<Local>) -> String {
    let hashtags = post
        .hashtags
        .iter()
        .map(|t| format!("#{}", t.trim_start_matches('#')))
        .collect::<Vec<_>>()
        .join(" ");

    format!(
        "# {title}\n\
         **Topic**: {topic}\n\
         **Written**: {date}\n\
         **SEO score**: {score}/100\n\
         \n\
         ## Content\n\
         {content}\n\
         \n\
         ## Hashtags\n\
         {hashtags}\n\
         \n\
         ## SEO analysis\n\
         **Score**: {score}/100\n\
         **Analysis**: {reason}\n",
        title = post.title,
        topic = topic,
        date = at.format("%Y-%m-%d %H:%M"),
        score = card.score,
        content = post.content.trim(),
        hashtags = hashtags,
        reason = card.reason,
    )
}

/// Canned replies for a dry run: one failed review, then a pass
pub fn scripted_agent() -> ScriptedAgent {
    ScriptedAgent::new("dry-run")
        .with_reply(
            ROLE_RESEARCHER,
            "Recent advances pair large language models with robot control; \
             warehouse and surgical robots lead adoption.",
        )
        .with_replies(
            ROLE_WRITER,
            [
                r#"{"title": "Robots Are Learning", "content": "Robots are getting smarter.", "hashtags": ["robotics"]}"#,
                r#"{"title": "AI Robotics in 2025: What Changed and Why It Matters", "content": "Foundation models now plan robot tasks...", "hashtags": ["AI", "robotics", "automation"]}"#,
            ],
        )
        .with_replies(
            ROLE_SEO,
            [
                r#"{"score": 62, "reason": "Title is vague and the body lacks keyword-rich headings."}"#,
                r#"{"score": 88, "reason": "Specific title, clear structure and natural keyword use."}"#,
            ],
        )
}
