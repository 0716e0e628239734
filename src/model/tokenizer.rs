use std::collections::HashMap;

/// SentencePiece word-start marker.
pub const WORD_MARKER: char = '▁';

pub const UNK_TOKEN_ID: u32 = 0;
pub const BOS_TOKEN_ID: u32 = 1;
pub const EOS_TOKEN_ID: u32 = 2;

const SPECIAL_PIECES: [&str; 3] = ["<unk>", "<s>", "</s>"];

/// Word-level tokenizer whose pieces follow the SentencePiece convention:
/// a piece starting with `▁` opens a new word, any other piece continues the
/// previous one.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    pieces: Vec<String>,
    ids: HashMap<String, u32>,
}

impl Tokenizer {
    pub fn from_corpus(corpus: &str) -> Self {
        let mut tokenizer = Self {
            pieces: Vec::new(),
            ids: HashMap::new(),
        };
        for special in SPECIAL_PIECES {
            tokenizer.insert(special.to_string());
        }
        for word in corpus.split_whitespace() {
            tokenizer.insert(format!("{WORD_MARKER}{word}"));
        }
        for c in corpus.chars().filter(|c| !c.is_whitespace()) {
            tokenizer.insert(c.to_string());
            tokenizer.insert(format!("{WORD_MARKER}{c}"));
        }
        tokenizer
    }

    fn insert(&mut self, piece: String) {
        if !self.ids.contains_key(&piece) {
            let id = self.pieces.len() as u32;
            self.ids.insert(piece.clone(), id);
            self.pieces.push(piece);
        }
    }

    pub fn vocab_size(&self) -> usize {
        self.pieces.len()
    }

    pub fn token_id(&self, piece: &str) -> Option<u32> {
        self.ids.get(piece).copied()
    }

    pub fn id_to_piece(&self, id: u32) -> Option<&str> {
        self.pieces.get(id as usize).map(String::as_str)
    }

    pub fn is_special(&self, id: u32) -> bool {
        (id as usize) < SPECIAL_PIECES.len()
    }

    /// BOS followed by one piece per known word; unknown words fall back to
    /// character pieces.
    pub fn encode(&self, text: &str) -> Vec<u32> {
        let mut ids = vec![BOS_TOKEN_ID];
        for word in text.split_whitespace() {
            if let Some(id) = self.token_id(&format!("{WORD_MARKER}{word}")) {
                ids.push(id);
                continue;
            }

            let mut chars = word.chars();
            if let Some(first) = chars.next() {
                ids.push(
                    self.token_id(&format!("{WORD_MARKER}{first}"))
                        .unwrap_or(UNK_TOKEN_ID),
                );
            }
            ids.extend(
                chars.map(|c| self.token_id(&c.to_string()).unwrap_or(UNK_TOKEN_ID)),
            );
        }
        ids
    }

    /// Text for a single token as it should be appended to a running output:
    /// the word marker becomes a leading space and special tokens vanish.
    pub fn decode_piece(&self, id: u32) -> String {
        if self.is_special(id) {
            return String::new();
        }
        match self.id_to_piece(id) {
            Some(piece) => match piece.strip_prefix(WORD_MARKER) {
                Some(rest) => format!(" {rest}"),
                None => piece.to_string(),
            },
            None => String::new(),
        }
    }

    pub fn decode(&self, ids: &[u32]) -> String {
        let text: String = ids.iter().map(|&id| self.decode_piece(id)).collect();
        text.trim_start().to_string()
    }
}
