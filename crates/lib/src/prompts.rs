//! # Default Prompts
//!
//! Centralized prompt constants for the chat pipeline. The final-answer
//! prompt is replaceable at runtime through the prompt store; the
//! product-identification, dosage, and query-contextualization prompts are
//! fixed and independent of it.

/// Substitution placeholder filled with retrieved catalogue excerpts.
pub const CONTEXT_PLACEHOLDER: &str = "{context}";

/// The sentinel the product-identification stage returns for a question that
/// does not concern any catalogue product.
pub const PRODUCT_SENTINEL: &str = "0";

/// Reformulates a history-dependent question into a standalone one before
/// retrieval.
pub const CONTEXTUALIZE_SYSTEM_PROMPT: &str = "\
Given a chat history and the latest user question which might reference \
context in the chat history, formulate a standalone question which can be \
understood without the chat history. Do NOT answer the question, just \
reformulate it if needed and otherwise return it as is.";

/// Classifies whether an utterance concerns catalogue products at all.
pub const PRODUCT_IDENTIFICATION_SYSTEM_PROMPT: &str = "\
You identify which products from a catalogue a customer's message is about.
Use only the catalogue excerpts below. If the message mentions or clearly \
refers to one or more catalogue products, reply with their exact names, one \
per line, and nothing else. If the message is a general question that does \
not concern any catalogue product, reply with the single character 0.

{context}";

/// Answers a dosage/usage question for one product at a time.
pub const DOSAGE_SYSTEM_PROMPT: &str = "\
You are given the name of one catalogue product. Using only the catalogue \
excerpts below, state the product's dosage and usage instructions concisely. \
If the excerpts contain no dosage information for the product, say so in one \
sentence.

{context}";

/// Initial final-answer prompt used until an administrator stores a custom
/// version. Already in normalized form (wrapped, with the placeholder).
pub const INITIAL_SYSTEM_PROMPT: &str = "\
\"\"\"
You are a friendly customer assistant for a product catalogue. Answer the \
customer's question helpfully and concisely, using the reference information \
provided. If you do not know the answer, say so instead of guessing.
\"\"\"

{context}";
