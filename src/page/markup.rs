//! Tolerant markup fragment parser. Never fails; `<script>` and `<style>`
//! blocks and inline event-handler attributes are dropped.

#[derive(Clone, Debug, PartialEq)]
pub enum MarkupNode {
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
        children: Vec<MarkupNode>,
    },
    Text(String),
}

const VOID_TAGS: [&str; 14] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];
const DROPPED_TAGS: [&str; 2] = ["script", "style"];

struct OpenElement {
    tag: String,
    attrs: Vec<(String, String)>,
    children: Vec<MarkupNode>,
}

pub fn parse_fragment(markup: &str) -> Vec<MarkupNode> {
    let chars: Vec<char> = markup.chars().collect();
    let mut stack: Vec<OpenElement> = vec![OpenElement {
        tag: String::new(),
        attrs: Vec::new(),
        children: Vec::new(),
    }];
    let mut text = String::new();
    let mut i = 0usize;

    while i < chars.len() {
        if chars[i] != '<' {
            text.push(chars[i]);
            i += 1;
            continue;
        }
        if starts_with(&chars, i, "<!--") {
            flush_text(&mut text, &mut stack);
            i = find(&chars, i + 4, "-->").map_or(chars.len(), |end| end + 3);
            continue;
        }
        if starts_with(&chars, i, "<!") || starts_with(&chars, i, "<?") {
            flush_text(&mut text, &mut stack);
            i = find(&chars, i, ">").map_or(chars.len(), |end| end + 1);
            continue;
        }
        if chars.get(i + 1) == Some(&'/') {
            flush_text(&mut text, &mut stack);
            let end = find(&chars, i, ">").unwrap_or(chars.len());
            let name: String = chars[(i + 2).min(end)..end]
                .iter()
                .collect::<String>()
                .trim()
                .to_ascii_lowercase();
            close_element(&mut stack, &name);
            i = end + 1;
            continue;
        }
        if !chars.get(i + 1).map_or(false, |c| c.is_ascii_alphabetic()) {
            text.push('<');
            i += 1;
            continue;
        }

        flush_text(&mut text, &mut stack);
        let (tag, attrs, self_closing, next) = parse_open_tag(&chars, i + 1);
        i = next;
        if DROPPED_TAGS.contains(&tag.as_str()) {
            if !self_closing {
                let closing = format!("</{tag}");
                i = find_ignore_case(&chars, i, &closing)
                    .and_then(|start| find(&chars, start, ">"))
                    .map_or(chars.len(), |end| end + 1);
            }
            continue;
        }
        if self_closing || VOID_TAGS.contains(&tag.as_str()) {
            push_node(
                &mut stack,
                MarkupNode::Element {
                    tag,
                    attrs,
                    children: Vec::new(),
                },
            );
        } else {
            stack.push(OpenElement {
                tag,
                attrs,
                children: Vec::new(),
            });
        }
    }
    flush_text(&mut text, &mut stack);
    while stack.len() > 1 {
        pop_into_parent(&mut stack);
    }
    stack.pop().map(|root| root.children).unwrap_or_default()
}

fn starts_with(chars: &[char], at: usize, token: &str) -> bool {
    token
        .chars()
        .enumerate()
        .all(|(k, t)| chars.get(at + k) == Some(&t))
}

fn find(chars: &[char], from: usize, token: &str) -> Option<usize> {
    (from..chars.len()).find(|&idx| starts_with(chars, idx, token))
}

fn find_ignore_case(chars: &[char], from: usize, token: &str) -> Option<usize> {
    let token: Vec<char> = token.chars().map(|c| c.to_ascii_lowercase()).collect();
    (from..chars.len()).find(|&idx| {
        token
            .iter()
            .enumerate()
            .all(|(k, t)| chars.get(idx + k).map(|c| c.to_ascii_lowercase()) == Some(*t))
    })
}

fn flush_text(text: &mut String, stack: &mut [OpenElement]) {
    if text.is_empty() {
        return;
    }
    let decoded = decode_entities(text);
    text.clear();
    if let Some(top) = stack.last_mut() {
        top.children.push(MarkupNode::Text(decoded));
    }
}

fn push_node(stack: &mut [OpenElement], node: MarkupNode) {
    if let Some(top) = stack.last_mut() {
        top.children.push(node);
    }
}

fn pop_into_parent(stack: &mut Vec<OpenElement>) {
    if let Some(open) = stack.pop() {
        push_node(
            stack,
            MarkupNode::Element {
                tag: open.tag,
                attrs: open.attrs,
                children: open.children,
            },
        );
    }
}

/// Close the nearest open element named `name`; stray closing tags are ignored.
fn close_element(stack: &mut Vec<OpenElement>, name: &str) {
    let Some(pos) = stack.iter().skip(1).rposition(|open| open.tag == name) else {
        return;
    };
    let target = pos + 1;
    while stack.len() > target {
        pop_into_parent(stack);
    }
}

fn parse_open_tag(chars: &[char], start: usize) -> (String, Vec<(String, String)>, bool, usize) {
    let mut i = start;
    let mut tag = String::new();
    while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '-') {
        tag.push(chars[i].to_ascii_lowercase());
        i += 1;
    }
    let mut attrs = Vec::new();
    let mut self_closing = false;
    loop {
        while i < chars.len() && chars[i].is_whitespace() {
            i += 1;
        }
        match chars.get(i) {
            None => break,
            Some('>') => {
                i += 1;
                break;
            }
            Some('/') => {
                self_closing = true;
                i += 1;
                continue;
            }
            _ => {}
        }
        let mut name = String::new();
        while i < chars.len() && !chars[i].is_whitespace() && !matches!(chars[i], '=' | '>' | '/') {
            name.push(chars[i].to_ascii_lowercase());
            i += 1;
        }
        if name.is_empty() {
            i += 1;
            continue;
        }
        self_closing = false;
        while i < chars.len() && chars[i].is_whitespace() {
            i += 1;
        }
        let mut value = String::new();
        if chars.get(i) == Some(&'=') {
            i += 1;
            while i < chars.len() && chars[i].is_whitespace() {
                i += 1;
            }
            match chars.get(i) {
                Some(&q) if q == '"' || q == '\'' => {
                    i += 1;
                    while i < chars.len() && chars[i] != q {
                        value.push(chars[i]);
                        i += 1;
                    }
                    i += 1;
                }
                _ => {
                    while i < chars.len() && !chars[i].is_whitespace() && chars[i] != '>' {
                        value.push(chars[i]);
                        i += 1;
                    }
                }
            }
        }
        if !name.starts_with("on") {
            attrs.push((name, decode_entities(&value)));
        }
    }
    (tag, attrs, self_closing, i.min(chars.len()))
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", "\u{a0}")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(nodes: &[MarkupNode]) -> Vec<String> {
        nodes
            .iter()
            .map(|n| match n {
                MarkupNode::Element { tag, .. } => tag.clone(),
                MarkupNode::Text(t) => format!("text:{t}"),
            })
            .collect()
    }

    #[test]
    fn parses_nested_elements_and_attributes() {
        let nodes = parse_fragment("<div id=\"a\" class='x y' data-n=3><b>bold</b> &amp; more</div>");
        assert_eq!(tags(&nodes), vec!["div"]);
        let MarkupNode::Element { attrs, children, .. } = &nodes[0] else {
            panic!("expected element");
        };
        assert!(attrs.contains(&("id".to_string(), "a".to_string())));
        assert!(attrs.contains(&("class".to_string(), "x y".to_string())));
        assert!(attrs.contains(&("data-n".to_string(), "3".to_string())));
        assert_eq!(tags(children), vec!["b".to_string(), "text: & more".to_string()]);
    }

    #[test]
    fn drops_scripts_styles_and_handlers() {
        let nodes = parse_fragment("<script>alert(1)</SCRIPT><style>p{}</style><p onclick=\"x()\">ok</p>");
        assert_eq!(tags(&nodes), vec!["p"]);
        let MarkupNode::Element { attrs, .. } = &nodes[0] else {
            panic!("expected element");
        };
        assert!(attrs.is_empty());
    }

    #[test]
    fn tolerates_broken_markup() {
        let nodes = parse_fragment("<div><span>open</div></p>tail<br>< 3");
        assert_eq!(tags(&nodes), vec!["div", "text:tail", "br", "text:< 3"]);
        assert!(parse_fragment("<").len() == 1);
        assert!(parse_fragment("").is_empty());
    }
}
