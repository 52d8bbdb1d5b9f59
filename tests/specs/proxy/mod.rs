mod http_forwarding;
