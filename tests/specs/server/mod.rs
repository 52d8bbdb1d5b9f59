mod broadcast;
mod client_reconnect;
mod remove_under_load;
mod websocket_echo;
