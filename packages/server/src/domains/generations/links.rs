//! Internal-link placement and markdown link bookkeeping.
//!
//! Selection is pure client-side logic: links are assigned to blocks by
//! their configured position. Verification helpers treat URLs with and
//! without a trailing slash as the same link.

use super::models::{Block, BlockType, InternalLink, LinkPosition};

/// One link routed to one block.
#[derive(Debug, Clone)]
pub struct LinkAssignment {
    pub link: InternalLink,
    pub block_id: i32,
}

/// Assign every internal link to a block.
///
/// `intro`/`conclusion` links all land on the single intro/conclusion block
/// (several per block is fine). `body` links go to distinct h2/h3 blocks in
/// document order; `any` links go to distinct non-h1/non-faq blocks in
/// order. When the distinct pool runs dry, remaining links reuse the last
/// eligible block rather than being dropped.
pub fn select_link_blocks(links: &[InternalLink], blocks: &[Block]) -> Vec<LinkAssignment> {
    let intro_block = blocks.iter().find(|b| b.block_type == BlockType::Intro);
    let conclusion_block = blocks
        .iter()
        .find(|b| b.block_type == BlockType::Conclusion);

    let body_pool: Vec<i32> = blocks
        .iter()
        .filter(|b| matches!(b.block_type, BlockType::H2 | BlockType::H3))
        .map(|b| b.id)
        .collect();
    let any_pool: Vec<i32> = blocks
        .iter()
        .filter(|b| !matches!(b.block_type, BlockType::H1 | BlockType::Faq))
        .map(|b| b.id)
        .collect();

    let mut used_body = 0usize;
    let mut used_any = 0usize;
    let mut assignments = Vec::with_capacity(links.len());

    for link in links {
        let block_id = match link.position {
            LinkPosition::Intro => intro_block.map(|b| b.id),
            LinkPosition::Conclusion => conclusion_block.map(|b| b.id),
            LinkPosition::Body => {
                let id = pick_next(&body_pool, &mut used_body);
                id.or_else(|| any_pool.last().copied())
            }
            LinkPosition::Any => {
                let id = pick_next(&any_pool, &mut used_any);
                id.or_else(|| any_pool.last().copied())
            }
        };

        // A link with no eligible block falls back to any content block.
        let Some(block_id) = block_id.or_else(|| any_pool.first().copied()) else {
            continue;
        };

        assignments.push(LinkAssignment {
            link: link.clone(),
            block_id,
        });
    }

    assignments
}

fn pick_next(pool: &[i32], used: &mut usize) -> Option<i32> {
    if *used < pool.len() {
        let id = pool[*used];
        *used += 1;
        Some(id)
    } else {
        pool.last().copied()
    }
}

/// True when `url` occurs in `text`, treating a trailing slash as optional.
pub fn url_present(text: &str, url: &str) -> bool {
    let trimmed = url.trim_end_matches('/');
    if text.contains(trimmed) {
        return true;
    }
    text.contains(&format!("{trimmed}/"))
}

/// Append a markdown link on its own paragraph.
pub fn force_append_link(text: &str, anchor: &str, url: &str) -> String {
    format!("{}\n\n[{anchor}]({url})", text.trim_end())
}

/// Extract `[anchor](url)` pairs from markdown.
pub fn extract_markdown_links(text: &str) -> Vec<(String, String)> {
    let bytes = text.as_bytes();
    let mut links = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'[' {
            if let Some(close) = find_from(bytes, i + 1, b']') {
                if close + 1 < bytes.len() && bytes[close + 1] == b'(' {
                    if let Some(paren) = find_from(bytes, close + 2, b')') {
                        let anchor = text[i + 1..close].to_string();
                        let url = text[close + 2..paren].trim().to_string();
                        if !url.is_empty() {
                            links.push((anchor, url));
                        }
                        i = paren + 1;
                        continue;
                    }
                }
            }
        }
        i += 1;
    }

    links
}

fn find_from(bytes: &[u8], start: usize, needle: u8) -> Option<usize> {
    bytes[start..]
        .iter()
        .position(|&b| b == needle)
        .map(|pos| start + pos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::generations::models::LinkDisplay;

    fn block(id: i32, block_type: BlockType) -> Block {
        Block {
            id,
            block_type,
            heading: format!("Heading {id}"),
            instruction: String::new(),
            lsi_keywords: vec![],
            questions: None,
            answered_questions: None,
            content: None,
        }
    }

    fn link(url: &str, position: LinkPosition) -> InternalLink {
        InternalLink {
            url: url.into(),
            anchor: Some("anchor".into()),
            anchorless: false,
            display_type: LinkDisplay::Inline,
            position,
        }
    }

    fn standard_blocks() -> Vec<Block> {
        vec![
            block(0, BlockType::H1),
            block(1, BlockType::Intro),
            block(2, BlockType::H2),
            block(3, BlockType::H3),
            block(4, BlockType::Conclusion),
            block(5, BlockType::Faq),
        ]
    }

    #[test]
    fn intro_and_conclusion_links_share_their_block() {
        let blocks = standard_blocks();
        let links = vec![
            link("https://a.example", LinkPosition::Intro),
            link("https://b.example", LinkPosition::Intro),
            link("https://c.example", LinkPosition::Conclusion),
        ];

        let assignments = select_link_blocks(&links, &blocks);
        assert_eq!(assignments.len(), 3);
        assert_eq!(assignments[0].block_id, 1);
        assert_eq!(assignments[1].block_id, 1);
        assert_eq!(assignments[2].block_id, 4);
    }

    #[test]
    fn body_links_take_distinct_headed_blocks_in_order() {
        let blocks = standard_blocks();
        let links = vec![
            link("https://a.example", LinkPosition::Body),
            link("https://b.example", LinkPosition::Body),
        ];

        let assignments = select_link_blocks(&links, &blocks);
        assert_eq!(assignments[0].block_id, 2);
        assert_eq!(assignments[1].block_id, 3);
    }

    #[test]
    fn any_links_avoid_h1_and_faq() {
        let blocks = standard_blocks();
        let links = vec![
            link("https://a.example", LinkPosition::Any),
            link("https://b.example", LinkPosition::Any),
            link("https://c.example", LinkPosition::Any),
        ];

        let assignments = select_link_blocks(&links, &blocks);
        let targets: Vec<i32> = assignments.iter().map(|a| a.block_id).collect();
        assert_eq!(targets, vec![1, 2, 3]);
        assert!(!targets.contains(&0));
        assert!(!targets.contains(&5));
    }

    #[test]
    fn overflow_reuses_last_eligible_block() {
        let blocks = vec![block(0, BlockType::H1), block(1, BlockType::H2)];
        let links = vec![
            link("https://a.example", LinkPosition::Body),
            link("https://b.example", LinkPosition::Body),
        ];

        let assignments = select_link_blocks(&links, &blocks);
        assert_eq!(assignments.len(), 2);
        assert_eq!(assignments[0].block_id, 1);
        assert_eq!(assignments[1].block_id, 1);
    }

    #[test]
    fn url_presence_ignores_trailing_slash() {
        let text = "See [shop](https://shop.example/coffee/) for details.";
        assert!(url_present(text, "https://shop.example/coffee"));
        assert!(url_present(text, "https://shop.example/coffee/"));
        assert!(!url_present(text, "https://other.example"));
    }

    #[test]
    fn markdown_link_extraction() {
        let text = "Intro [one](https://a.example) middle [two](https://b.example/x) end.";
        let links = extract_markdown_links(text);
        assert_eq!(
            links,
            vec![
                ("one".to_string(), "https://a.example".to_string()),
                ("two".to_string(), "https://b.example/x".to_string()),
            ]
        );
    }

    #[test]
    fn force_append_shape() {
        let appended = force_append_link("Paragraph.", "shop", "https://shop.example/coffee");
        assert!(appended.ends_with("\n\n[shop](https://shop.example/coffee)"));
    }
}
