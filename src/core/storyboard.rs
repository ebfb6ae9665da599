/// Storyboard planning: split a scene into boards and boards into panels.
use tracing::debug;

/// Stock shots used to pad a board that has fewer beats than panels.
const PADDING_SHOTS: [&str; 5] = [
    "Atmospheric wide shot that reinforces the mood.",
    "Close-up on a key character reaction.",
    "Transition shot that hints at the next beat.",
    "Establishing shot of the environment.",
    "Detail shot showing important visual elements.",
];

const DEFAULT_INSTRUCTION: &str = "Establish the setting and key characters.";

/// A titled chunk of scene text illustrated by one generated image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Storyboard {
    pub title: String,
    pub text: String,
}

/// A `## ` section of scene text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub title: String,
    pub body: String,
}

impl Section {
    fn render(&self) -> String {
        format!("## {}\n\n{}", self.title, self.body)
    }
}

/// Split scene text on `## ` headings. Text before the first heading is
/// kept as an "Opening" section unless it is blank or only a `# ` title.
pub fn extract_sections(text: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut title: Option<String> = None;
    let mut lines: Vec<&str> = Vec::new();
    let mut seen_heading = false;

    for line in text.lines() {
        if let Some(heading) = line.strip_prefix("## ") {
            push_section(&mut sections, title.take(), &lines);
            lines.clear();
            title = Some(heading.trim().to_string());
            seen_heading = true;
        } else {
            lines.push(line);
        }
    }
    if seen_heading {
        push_section(&mut sections, title, &lines);
    }
    sections
}

fn push_section(sections: &mut Vec<Section>, title: Option<String>, lines: &[&str]) {
    let body = lines.join("\n").trim().to_string();
    match title {
        Some(title) => sections.push(Section { title, body }),
        None if !is_title_only(&body) => sections.push(Section {
            title: "Opening".to_string(),
            body,
        }),
        None => {}
    }
}

fn is_title_only(body: &str) -> bool {
    body.lines()
        .all(|line| line.trim().is_empty() || line.starts_with("# "))
}

fn paragraphs(text: &str) -> Vec<&str> {
    text.split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

/// Paragraphs that are not headings.
fn body_paragraphs(text: &str) -> Vec<&str> {
    paragraphs(text)
        .into_iter()
        .filter(|p| !p.starts_with('#'))
        .collect()
}

/// First sentence of a paragraph, whitespace collapsed.
pub fn first_sentence(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            if let Some((_, ' ')) = chars.peek() {
                return collapsed[..=i].to_string();
            }
        }
    }
    collapsed
}

/// Divide a scene into between `min` and `max` storyboards.
///
/// Sections are grouped when there are more than `max`; boards are split
/// at paragraph boundaries while there are fewer than `min` and some board
/// still has more than one paragraph. Only headings of split boards are
/// dropped; their titles carry them.
pub fn divide_into_storyboards(text: &str, min: usize, max: usize) -> Vec<Storyboard> {
    let max = max.max(1);
    let sections = extract_sections(text);

    let mut boards: Vec<Storyboard> = if sections.is_empty() {
        let mut paras = body_paragraphs(text);
        if paras.is_empty() && !text.trim().is_empty() {
            paras.push(text.trim());
        }
        let per_board = paras.len().div_ceil(max).max(1);
        paras
            .chunks(per_board)
            .enumerate()
            .map(|(i, chunk)| Storyboard {
                title: format!("Part {}", i + 1),
                text: chunk.join("\n\n"),
            })
            .collect()
    } else {
        let per_board = sections.len().div_ceil(max).max(1);
        sections
            .chunks(per_board)
            .map(|chunk| Storyboard {
                title: chunk[0].title.clone(),
                text: chunk.iter().map(Section::render).collect::<Vec<_>>().join("\n\n"),
            })
            .collect()
    };

    while boards.len() < min {
        let Some(index) = boards
            .iter()
            .enumerate()
            .filter(|(_, b)| body_paragraphs(&b.text).len() > 1)
            .max_by_key(|(i, b)| (body_paragraphs(&b.text).len(), std::cmp::Reverse(*i)))
            .map(|(i, _)| i)
        else {
            break;
        };
        let board = boards.remove(index);
        let paras = body_paragraphs(&board.text);
        let mid = paras.len() / 2;
        boards.insert(
            index,
            Storyboard {
                title: format!("{} (Part 2)", board.title),
                text: paras[mid..].join("\n\n"),
            },
        );
        boards.insert(
            index,
            Storyboard {
                title: format!("{} (Part 1)", board.title),
                text: paras[..mid].join("\n\n"),
            },
        );
    }

    debug!(boards = boards.len(), "Scene divided into storyboards");
    boards
}

/// One instruction per key beat of a board, padded or truncated to `count`.
///
/// With no `count`, the number of beats is clamped to 3..=5.
pub fn panel_instructions(chunk: &str, count: Option<usize>) -> Vec<String> {
    let sections = extract_sections(chunk);
    let mut instructions: Vec<String> = if sections.is_empty() {
        paragraphs(chunk)
            .into_iter()
            .map(first_sentence)
            .filter(|s| !s.is_empty())
            .collect()
    } else {
        sections
            .iter()
            .flat_map(|section| {
                paragraphs(&section.body)
                    .into_iter()
                    .take(2)
                    .map(first_sentence)
                    .filter(|s| !s.is_empty())
                    .map(|s| format!("{}: {}", section.title, s))
                    .collect::<Vec<_>>()
            })
            .collect()
    };

    if instructions.is_empty() {
        instructions.push(DEFAULT_INSTRUCTION.to_string());
    }
    let count = count.unwrap_or_else(|| instructions.len().clamp(3, 5));
    instructions.truncate(count);
    while instructions.len() < count {
        let shot = PADDING_SHOTS[(instructions.len() - 1) % PADDING_SHOTS.len()];
        instructions.push(shot.to_string());
    }
    instructions
}
