mod plaintext_session;
mod resp_session;
