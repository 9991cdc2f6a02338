//! Prompt construction for the chat-completions research call.

use crate::ResearchRequest;

/// System message sent with every request.
pub const SYSTEM_PROMPT: &str = "You are an analyst researching local organizations and the \
best contact information for the person who leads each program. Do not make up or fabricate \
any results. Only report organizations, people, phone numbers, emails and URLs you can \
substantiate. Leave a field empty when you cannot verify it. If no organizations are found, \
return an empty \"organizations\" list and say \"No organizations found\" in the search summary.";

/// Build the user message for one sub-region.
pub fn user_prompt(request: &ResearchRequest) -> String {
    let ResearchRequest {
        sub_region,
        region,
        query,
        max_results,
    } = request;

    format!(
        r#"Research this in {sub_region}, {region}: {query}

Return up to {max_results} organizations, best match first, as JSON in exactly this shape:
{{
  "organizations": [
    {{
      "name": "Organization name",
      "description": "Brief description of services",
      "key_personnel": {{"name": "", "title": "", "phone": "", "email": ""}},
      "general_contact": {{"phone": "", "email": "", "website": ""}},
      "address": "Physical address",
      "notes": "Other relevant information",
      "confidence": 0.85,
      "source_urls": ["https://..."]
    }}
  ],
  "search_summary": "How you searched {sub_region}, {region} and what you found"
}}

"confidence" is a number between 0 and 1. Use an empty string for anything you could not verify.
If nothing matches, return {{"organizations": [], "search_summary": "No organizations found in {sub_region}, {region}"}}."#
    )
}
